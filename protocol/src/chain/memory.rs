//! In-process vault.
//!
//! `MemoryVault` answers every [`VaultReader`] query from a [`VaultSnapshot`]
//! and executes [`VaultWriter`] submissions against it, re-applying the
//! contract's rules with the same integer math the client uses. It is what the
//! test suite and `salvage simulate` run against.
//!
//! Transactions execute at submission time and their receipts are held until
//! someone asks for them. That keeps ordering observable: anything that
//! happens between `submit` and the next `submit` can be checked against
//! [`MemoryVault::submission_count`].
//!
//! Failure injection:
//!
//! - [`MemoryVault::fail_reads`] makes a named read return a transport error
//! - [`MemoryVault::delay_reads`] makes a named read sleep first
//! - [`MemoryVault::decline_next`] makes the next submission a wallet refusal
//! - [`MemoryVault::revert_next`] rejects the next submission up front
//! - [`MemoryVault::revert_on_confirm`] lets the next submission through but
//!   mines it as failed

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ChainError, FeeTable, OracleAnswer, RedeemCall, RoundStatus, TxReceipt, TxRequest,
    VaultReader, VaultWriter,
};
use crate::eligibility::merkle::{self, MerkleTree};
use crate::fees::{FeeModel, FeeSchedule, FeeSettlement, TierMode};
use crate::math::{
    normalize_price, serde_u256, token_to_usd18, token_to_usd_fixed, usd18_to_token,
    usd_integer_to_stable, Usd, Usd18,
};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A token balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Holder.
    pub owner: Address,
    /// Raw amount.
    #[serde(with = "serde_u256")]
    pub amount: U256,
}

/// An ERC-20 allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Token holder.
    pub owner: Address,
    /// Approved spender.
    pub spender: Address,
    /// Raw allowance.
    #[serde(with = "serde_u256")]
    pub amount: U256,
}

/// One ERC-20 token known to the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    /// Token contract.
    pub address: Address,
    /// Display symbol.
    #[serde(default)]
    pub symbol: String,
    /// ERC-20 decimals.
    pub decimals: u8,
    /// Vault's fixed USD price, 1e18-scaled. Zero if the token is not
    /// redeemable.
    #[serde(default, with = "serde_u256")]
    pub usd_price18: U256,
    /// The token refuses non-zero to non-zero allowance changes.
    #[serde(default)]
    pub approval_reset: bool,
    /// Amount the vault holds and can pay out.
    #[serde(default, with = "serde_u256")]
    pub liquidity: U256,
    /// Balances.
    #[serde(default)]
    pub balances: Vec<Holding>,
    /// Allowances.
    #[serde(default)]
    pub allowances: Vec<Grant>,
}

impl TokenSnapshot {
    /// A token with no balances.
    pub fn new(address: Address, symbol: &str, decimals: u8, usd_price18: U256) -> Self {
        Self {
            address,
            symbol: symbol.to_string(),
            decimals,
            usd_price18,
            approval_reset: false,
            liquidity: U256::ZERO,
            balances: Vec::new(),
            allowances: Vec::new(),
        }
    }

    /// Sets `owner`'s balance.
    pub fn with_balance(mut self, owner: Address, amount: U256) -> Self {
        self.set_balance(owner, amount);
        self
    }

    /// Sets an allowance.
    pub fn with_allowance(mut self, owner: Address, spender: Address, amount: U256) -> Self {
        self.set_allowance(owner, spender, amount);
        self
    }

    /// Sets the vault's payout liquidity.
    pub fn with_liquidity(mut self, amount: U256) -> Self {
        self.liquidity = amount;
        self
    }

    /// Marks the token as requiring a zero reset between approvals.
    pub fn with_approval_reset(mut self) -> Self {
        self.approval_reset = true;
        self
    }

    /// Balance of `owner`.
    pub fn balance_of(&self, owner: Address) -> U256 {
        self.balances
            .iter()
            .find(|h| h.owner == owner)
            .map(|h| h.amount)
            .unwrap_or(U256::ZERO)
    }

    /// Allowance from `owner` to `spender`.
    pub fn allowance_of(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .iter()
            .find(|g| g.owner == owner && g.spender == spender)
            .map(|g| g.amount)
            .unwrap_or(U256::ZERO)
    }

    fn set_balance(&mut self, owner: Address, amount: U256) {
        match self.balances.iter_mut().find(|h| h.owner == owner) {
            Some(h) => h.amount = amount,
            None => self.balances.push(Holding { owner, amount }),
        }
    }

    fn set_allowance(&mut self, owner: Address, spender: Address, amount: U256) {
        match self
            .allowances
            .iter_mut()
            .find(|g| g.owner == owner && g.spender == spender)
        {
            Some(g) => g.amount = amount,
            None => self.allowances.push(Grant {
                owner,
                spender,
                amount,
            }),
        }
    }
}

/// An oracle feed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Feed contract.
    pub address: Address,
    /// Latest answer.
    #[serde(with = "serde_u256")]
    pub answer: U256,
    /// Reported decimals, if the feed reports any.
    #[serde(default)]
    pub decimals: Option<u8>,
}

/// USD already redeemed today by one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySpend {
    /// Wallet.
    pub wallet: Address,
    /// Spent so far, 1e18-scaled.
    pub usd18: Usd18,
}

/// Complete vault state. Every field has a default so TOML snapshots only
/// need to spell out what matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSnapshot {
    /// Vault contract address.
    pub vault: Address,
    /// Per-wallet daily cap, whole USD.
    pub daily_cap_usd: Usd,
    /// Today's spend per wallet.
    pub spent: Vec<DailySpend>,
    /// Fee thresholds, whole USD, in contract storage order.
    pub fee_thresholds: Vec<Usd>,
    /// Fee rates, parallel to `fee_thresholds`.
    pub fee_bps: Vec<u32>,
    /// How the contract picks a tier.
    pub tier_mode: TierMode,
    /// How the contract collects its fee.
    pub fee_settlement: FeeSettlement,
    /// The vault oracle's native-asset USD answer.
    #[serde(with = "serde_u256")]
    pub oracle_answer: U256,
    /// Decimals of `oracle_answer`, if reported.
    pub oracle_decimals: Option<u8>,
    /// Standalone feeds.
    pub feeds: Vec<FeedSnapshot>,
    /// Allow-list members. When non-empty the root is derived from them.
    pub allowlist: Vec<Address>,
    /// Explicit allow-list root, used when `allowlist` is empty.
    pub allowlist_root: B256,
    /// A redemption round is open.
    pub round_active: bool,
    /// The operator has locked the vault.
    pub locked: bool,
    /// Tokens, claim and stable alike.
    pub tokens: Vec<TokenSnapshot>,
    /// Legacy gas price quote.
    #[serde(with = "serde_u256")]
    pub gas_price_wei: U256,
    /// Artificial latency applied to every read, in milliseconds.
    pub read_delay_ms: u64,
    /// Current block height.
    pub block_number: u64,
}

impl Default for VaultSnapshot {
    fn default() -> Self {
        Self {
            vault: Address::ZERO,
            daily_cap_usd: Usd::ZERO,
            spent: Vec::new(),
            fee_thresholds: Vec::new(),
            fee_bps: Vec::new(),
            tier_mode: TierMode::Cap,
            fee_settlement: FeeSettlement::Deducted,
            oracle_answer: U256::ZERO,
            oracle_decimals: None,
            feeds: Vec::new(),
            allowlist: Vec::new(),
            allowlist_root: B256::ZERO,
            round_active: true,
            locked: false,
            tokens: Vec::new(),
            gas_price_wei: U256::ZERO,
            read_delay_ms: 0,
            block_number: 1,
        }
    }
}

impl VaultSnapshot {
    /// Token entry by address.
    pub fn token(&self, address: Address) -> Option<&TokenSnapshot> {
        self.tokens.iter().find(|t| t.address == address)
    }

    fn token_mut(&mut self, address: Address) -> Option<&mut TokenSnapshot> {
        self.tokens.iter_mut().find(|t| t.address == address)
    }

    /// The root the contract checks proofs against.
    pub fn effective_root(&self) -> B256 {
        if self.allowlist.is_empty() {
            self.allowlist_root
        } else {
            MerkleTree::from_addresses(&self.allowlist).root()
        }
    }

    /// Proof for an allow-list member.
    pub fn proof_for(&self, address: Address) -> Option<Vec<B256>> {
        MerkleTree::from_addresses(&self.allowlist).proof_for(address)
    }

    /// Spent so far today by `wallet`.
    pub fn spent_by(&self, wallet: Address) -> Usd18 {
        self.spent
            .iter()
            .find(|s| s.wallet == wallet)
            .map(|s| s.usd18)
            .unwrap_or(Usd18::ZERO)
    }

    /// `cap - spent`, floored at zero.
    pub fn remaining_for(&self, wallet: Address) -> Usd18 {
        let cap = self.daily_cap_usd.to_usd18().unwrap_or(Usd18::ZERO);
        cap.checked_sub(self.spent_by(wallet)).unwrap_or(Usd18::ZERO)
    }

    fn add_spend(&mut self, wallet: Address, usd18: Usd18) {
        match self.spent.iter_mut().find(|s| s.wallet == wallet) {
            Some(s) => s.usd18 = s.usd18.checked_add(usd18).unwrap_or(s.usd18),
            None => self.spent.push(DailySpend { wallet, usd18 }),
        }
    }

    fn native_price18(&self) -> U256 {
        normalize_price(self.oracle_answer, self.oracle_decimals.unwrap_or(18)).unwrap_or(U256::ZERO)
    }
}

// ---------------------------------------------------------------------------
// MemoryVault
// ---------------------------------------------------------------------------

/// A submission as the vault saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    /// Sender.
    pub from: Address,
    /// What was asked for.
    pub request: TxRequest,
    /// Fee model the submission carried.
    pub fees: FeeModel,
    /// Assigned hash.
    pub hash: B256,
}

#[derive(Debug, Default)]
struct VaultState {
    snapshot: VaultSnapshot,
    failing_reads: HashSet<String>,
    read_delays: HashMap<String, Duration>,
    decline_next: bool,
    revert_next: Option<String>,
    revert_on_confirm: Option<String>,
    submissions: Vec<SubmittedTx>,
    receipts: HashMap<B256, TxReceipt>,
    nonce: u64,
}

/// An in-process vault. See the module docs.
#[derive(Debug, Default)]
pub struct MemoryVault {
    state: Mutex<VaultState>,
}

impl MemoryVault {
    /// Wraps a snapshot.
    pub fn new(snapshot: VaultSnapshot) -> Self {
        Self {
            state: Mutex::new(VaultState {
                snapshot,
                ..VaultState::default()
            }),
        }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> VaultSnapshot {
        self.state.lock().snapshot.clone()
    }

    /// Mutates the state in place.
    pub fn update(&self, f: impl FnOnce(&mut VaultSnapshot)) {
        f(&mut self.state.lock().snapshot);
    }

    /// Makes the named read fail until [`MemoryVault::restore_reads`].
    pub fn fail_reads(&self, name: &str) {
        self.state.lock().failing_reads.insert(name.to_string());
    }

    /// Delays the named read.
    pub fn delay_reads(&self, name: &str, delay: Duration) {
        self.state.lock().read_delays.insert(name.to_string(), delay);
    }

    /// Clears injected read failures and delays.
    pub fn restore_reads(&self) {
        let mut st = self.state.lock();
        st.failing_reads.clear();
        st.read_delays.clear();
    }

    /// The next submission is refused by the "wallet".
    pub fn decline_next(&self) {
        self.state.lock().decline_next = true;
    }

    /// The next submission is rejected before broadcast with `message`.
    pub fn revert_next(&self, message: &str) {
        self.state.lock().revert_next = Some(message.to_string());
    }

    /// The next submission is broadcast but mined as failed with `message`.
    pub fn revert_on_confirm(&self, message: &str) {
        self.state.lock().revert_on_confirm = Some(message.to_string());
    }

    /// Everything submitted so far.
    pub fn submissions(&self) -> Vec<SubmittedTx> {
        self.state.lock().submissions.clone()
    }

    /// Number of submissions so far.
    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    async fn read<T>(
        &self,
        name: &'static str,
        f: impl FnOnce(&VaultSnapshot) -> Result<T, ChainError> + Send,
    ) -> Result<T, ChainError> {
        let delay = {
            let st = self.state.lock();
            if st.failing_reads.contains(name) {
                return Err(ChainError::Transport(format!("{}: injected failure", name)));
            }
            st.read_delays
                .get(name)
                .copied()
                .or_else(|| (st.snapshot.read_delay_ms > 0).then(|| Duration::from_millis(st.snapshot.read_delay_ms)))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let st = self.state.lock();
        f(&st.snapshot)
    }
}

#[async_trait]
impl VaultReader for MemoryVault {
    async fn daily_cap_usd(&self) -> Result<Usd, ChainError> {
        self.read("daily_cap_usd", |s| Ok(s.daily_cap_usd)).await
    }

    async fn remaining_daily_usd18(&self, wallet: Address) -> Result<Usd18, ChainError> {
        self.read("remaining_daily_usd18", move |s| Ok(s.remaining_for(wallet)))
            .await
    }

    async fn fee_table(&self) -> Result<FeeTable, ChainError> {
        self.read("fee_table", |s| {
            Ok(FeeTable {
                thresholds: s.fee_thresholds.clone(),
                bps: s.fee_bps.clone(),
            })
        })
        .await
    }

    async fn token_usd_price18(&self, token: Address) -> Result<U256, ChainError> {
        self.read("token_usd_price18", move |s| {
            Ok(s.token(token).map(|t| t.usd_price18).unwrap_or(U256::ZERO))
        })
        .await
    }

    async fn vault_oracle_price(&self) -> Result<OracleAnswer, ChainError> {
        self.read("vault_oracle_price", |s| {
            Ok(OracleAnswer {
                answer: s.oracle_answer,
                decimals: s.oracle_decimals,
            })
        })
        .await
    }

    async fn feed_price(&self, feed: Address) -> Result<OracleAnswer, ChainError> {
        self.read("feed_price", move |s| {
            s.feeds
                .iter()
                .find(|f| f.address == feed)
                .map(|f| OracleAnswer {
                    answer: f.answer,
                    decimals: f.decimals,
                })
                .ok_or_else(|| ChainError::Transport(format!("no feed at {}", feed)))
        })
        .await
    }

    async fn allowlist_root(&self) -> Result<B256, ChainError> {
        self.read("allowlist_root", |s| Ok(s.effective_root())).await
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.read("allowance", move |s| {
            Ok(s.token(token)
                .map(|t| t.allowance_of(owner, spender))
                .unwrap_or(U256::ZERO))
        })
        .await
    }

    async fn round_status(&self) -> Result<RoundStatus, ChainError> {
        self.read("round_status", |s| {
            Ok(RoundStatus {
                active: s.round_active,
                locked: s.locked,
            })
        })
        .await
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.read("token_decimals", move |s| {
            s.token(token)
                .map(|t| t.decimals)
                .ok_or_else(|| ChainError::Transport(format!("{} is not a token", token)))
        })
        .await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.read("token_balance", move |s| {
            Ok(s.token(token).map(|t| t.balance_of(owner)).unwrap_or(U256::ZERO))
        })
        .await
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.read("gas_price", |s| Ok(s.gas_price_wei)).await
    }
}

#[async_trait]
impl VaultWriter for MemoryVault {
    async fn submit(
        &self,
        from: Address,
        request: &TxRequest,
        fees: &FeeModel,
    ) -> Result<B256, ChainError> {
        let mut st = self.state.lock();

        if std::mem::take(&mut st.decline_next) {
            return Err(ChainError::UserDeclined);
        }
        if let Some(message) = st.revert_next.take() {
            return Err(ChainError::from_message(message));
        }

        st.nonce += 1;
        let mut preimage = Vec::with_capacity(28);
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(&st.nonce.to_be_bytes());
        let hash = keccak256(&preimage);

        st.submissions.push(SubmittedTx {
            from,
            request: request.clone(),
            fees: *fees,
            hash,
        });

        let outcome = match st.revert_on_confirm.take() {
            Some(message) => Err(message),
            None => apply(&mut st.snapshot, from, request),
        };

        st.snapshot.block_number += 1;
        let receipt = TxReceipt {
            hash,
            block_number: st.snapshot.block_number,
            success: outcome.is_ok(),
            revert_reason: outcome.err(),
        };
        debug!(%hash, %request, success = receipt.success, "MemoryVault executed transaction");
        st.receipts.insert(hash, receipt);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt, ChainError> {
        self.state
            .lock()
            .receipts
            .get(&hash)
            .cloned()
            .ok_or_else(|| ChainError::Transport(format!("unknown transaction {}", hash)))
    }
}

// ---------------------------------------------------------------------------
// Contract rules
// ---------------------------------------------------------------------------

fn apply(s: &mut VaultSnapshot, from: Address, request: &TxRequest) -> Result<(), String> {
    match request {
        TxRequest::Approve {
            token,
            spender,
            amount,
        } => {
            let t = s
                .token_mut(*token)
                .ok_or_else(|| "execution reverted: not a token".to_string())?;
            let current = t.allowance_of(from, *spender);
            if t.approval_reset && !current.is_zero() && !amount.is_zero() {
                return Err("execution reverted: approve from non-zero to non-zero allowance".into());
            }
            t.set_allowance(from, *spender, *amount);
            Ok(())
        }
        TxRequest::Redeem(call) => redeem(s, from, call),
    }
}

fn redeem(s: &mut VaultSnapshot, from: Address, call: &RedeemCall) -> Result<(), String> {
    if s.locked {
        return Err("execution reverted: Contract locked".into());
    }
    if !s.round_active {
        return Err("execution reverted: Round not started".into());
    }
    if !merkle::verify(from, &call.proof, s.effective_root()) {
        return Err("execution reverted: Not whitelisted".into());
    }

    let (decimals_in, price18, balance, allowance) = {
        let t = s
            .token(call.token_in)
            .ok_or_else(|| "execution reverted: unsupported token".to_string())?;
        (
            t.decimals,
            t.usd_price18,
            t.balance_of(from),
            t.allowance_of(from, call.vault),
        )
    };
    if price18.is_zero() {
        return Err("execution reverted: unsupported token".into());
    }
    if allowance < call.amount_in {
        return Err("execution reverted: Insufficient allowance".into());
    }
    if balance < call.amount_in {
        return Err("execution reverted: Insufficient balance".into());
    }

    let value18 = token_to_usd18(call.amount_in, decimals_in, price18).map_err(|e| e.to_string())?;
    if value18 > s.remaining_for(from) {
        return Err("execution reverted: daily limit exceeded".into());
    }

    let gross: Usd = token_to_usd_fixed(call.amount_in, decimals_in, price18).map_err(|e| e.to_string())?;
    let schedule = FeeSchedule::from_pairs(&s.fee_thresholds, &s.fee_bps).map_err(|e| e.to_string())?;
    let breakdown = schedule
        .breakdown(gross, s.tier_mode)
        .map_err(|e| e.to_string())?;

    let paid_usd = match s.fee_settlement {
        FeeSettlement::Deducted => breakdown.net,
        FeeSettlement::NativeValue => {
            let fee18 = breakdown.fee.to_usd18().map_err(|e| e.to_string())?;
            let native_price = s.native_price18();
            let required = if fee18 == Usd18::ZERO {
                U256::ZERO
            } else {
                usd18_to_token(fee18, 18, native_price).map_err(|e| e.to_string())?
            };
            if call.value < required {
                return Err("execution reverted: insufficient fee value".into());
            }
            breakdown.gross
        }
    };

    let decimals_out = s
        .token(call.token_out)
        .map(|t| t.decimals)
        .ok_or_else(|| "execution reverted: unsupported payout token".to_string())?;
    let amount_out = usd_integer_to_stable(paid_usd, decimals_out).map_err(|e| e.to_string())?;

    let liquidity = s.token(call.token_out).map(|t| t.liquidity).unwrap_or(U256::ZERO);
    if liquidity < amount_out {
        return Err("execution reverted: No funds".into());
    }

    // Effects.
    if let Some(t) = s.token_mut(call.token_in) {
        t.set_balance(from, balance - call.amount_in);
        t.set_allowance(from, call.vault, allowance - call.amount_in);
        t.liquidity = t.liquidity.saturating_add(call.amount_in);
    }
    if let Some(t) = s.token_mut(call.token_out) {
        let before = t.balance_of(from);
        t.liquidity = liquidity - amount_out;
        t.set_balance(from, before.saturating_add(amount_out));
    }
    s.add_spend(from, value18);
    Ok(())
}
