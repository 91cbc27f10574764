//! # Redeem Planner
//!
//! Turns "redeem 250.5 of token X into stable Y" into a [`RedeemPlan`]:
//! the exact transactions to sign, what they are worth, and everything that
//! would make the vault say no.
//!
//! Only malformed input and an unreadable token are errors. Everything else
//! that can go wrong (eligibility, limits, round status, prices, fee table)
//! lands in the plan as a blocking reason or a warning, so the user sees all
//! of it at once rather than one failure per attempt.
//!
//! ```text
//! amount syntax ─► decimals ─► parse ─┬─ eligibility ──┐
//!                                     ├─ daily limit ──┤
//!                                     ├─ round status ─┤
//!                                     ├─ fee table ────┼─► reasons / warnings
//!                                     ├─ token price ──┤   preview
//!                                     ├─ allowance ────┤   steps
//!                                     ├─ balance ──────┤
//!                                     └─ ref. price ───┘
//! ```

pub mod plan;

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::chain::{ChainError, FeeTable, RedeemCall, VaultReader};
use crate::config::{RedeemConfig, MAX_TOKEN_DECIMALS, NATIVE_DECIMALS};
use crate::eligibility::{EligibilityCheck, EligibilityVerifier, Ineligible};
use crate::fees::{FeeError, FeeSchedule, FeeSettlement};
use crate::limits::{LimitCheck, LimitIssue, LimitPreflight};
use crate::math::{
    parse_units, token_to_usd_fixed, usd18_to_token, usd_integer_to_stable, MathError,
    TokenAmount,
};
use crate::price::{PriceError, PriceResolution, PriceSource};

pub use plan::{BlockReason, PlanStep, Preview, RedeemPlan, StepKind, Warning};

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemRequest {
    /// Redeeming wallet.
    pub user: Address,
    /// Claim token.
    pub token_in: Address,
    /// Human-readable amount of `token_in`, e.g. `"250.5"`.
    pub amount: String,
    /// Stable token to be paid in.
    pub redeem_target: Address,
    /// Proof supplied by the caller; looked up in the proof book if absent.
    #[serde(default)]
    pub proof: Option<Vec<B256>>,
}

/// Errors that prevent a plan from being built at all.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The amount is not a positive decimal number representable in the
    /// token's precision.
    #[error("invalid amount: {0}")]
    InvalidAmount(MathError),

    /// Token metadata could not be read.
    #[error("token metadata unavailable: {0}")]
    Chain(#[from] ChainError),

    /// The fee table could not be applied.
    #[error(transparent)]
    Fee(#[from] FeeError),

    /// Preview arithmetic overflowed.
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Builds redeem plans against one vault deployment.
pub struct RedeemPlanner {
    reader: Arc<dyn VaultReader>,
    config: RedeemConfig,
    eligibility: EligibilityVerifier,
    limits: LimitPreflight,
    prices: PriceSource,
}

impl RedeemPlanner {
    /// A planner with price providers from `config` and no proof sources.
    pub fn new(reader: Arc<dyn VaultReader>, config: RedeemConfig) -> Self {
        Self {
            eligibility: EligibilityVerifier::new(reader.clone())
                .with_timeout(config.proof_timeout()),
            limits: LimitPreflight::new(reader.clone()),
            prices: PriceSource::from_config(&config, reader.clone()),
            reader,
            config,
        }
    }

    /// Replaces the eligibility verifier.
    pub fn with_eligibility(mut self, eligibility: EligibilityVerifier) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Replaces the price source.
    pub fn with_prices(mut self, prices: PriceSource) -> Self {
        self.prices = prices;
        self
    }

    /// Deployment config the planner was built with.
    pub fn config(&self) -> &RedeemConfig {
        &self.config
    }

    /// Chain reader shared with the verifier and price providers.
    pub fn reader(&self) -> &Arc<dyn VaultReader> {
        &self.reader
    }

    /// Drops cached proof data.
    pub fn reset_caches(&self) {
        self.eligibility.reset();
    }

    /// Builds a plan.
    pub async fn prepare(&self, request: &RedeemRequest) -> Result<RedeemPlan, PlanError> {
        // Syntax first, so garbage input never costs a network round trip.
        let probe = parse_units(&request.amount, MAX_TOKEN_DECIMALS).map_err(PlanError::InvalidAmount)?;
        if probe.is_zero() {
            return Err(PlanError::InvalidAmount(MathError::InvalidAmount(
                "amount must be greater than zero".into(),
            )));
        }

        let (decimals_in, decimals_out) = tokio::try_join!(
            self.reader.token_decimals(request.token_in),
            self.reader.token_decimals(request.redeem_target),
        )?;
        let amount = parse_units(&request.amount, decimals_in).map_err(PlanError::InvalidAmount)?;

        let user = request.user;
        let vault = self.config.vault;
        let (eligibility, limit, status, fee_table, token_price, allowance, balance, price) = tokio::join!(
            self.eligibility.check_with_proof(user, request.proof.clone()),
            self.limits.check_raw(user, request.token_in, amount, decimals_in),
            self.reader.round_status(),
            self.reader.fee_table(),
            self.reader.token_usd_price18(request.token_in),
            self.reader.allowance(request.token_in, user, vault),
            self.reader.token_balance(request.token_in, user),
            self.prices.resolve(),
        );

        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        eligibility_diagnostics(&eligibility, &mut reasons, &mut warnings);
        limit_diagnostics(&limit, &mut reasons);

        match status {
            Ok(s) => {
                if !s.active {
                    reasons.push(BlockReason::RoundNotActive);
                }
                if s.locked {
                    reasons.push(BlockReason::ContractLocked);
                }
            }
            Err(e) => reasons.push(BlockReason::StatusUnavailable {
                detail: e.to_string(),
            }),
        }

        match &balance {
            Ok(b) if *b < amount => reasons.push(BlockReason::InsufficientBalance {
                balance: *b,
                required: amount,
            }),
            Ok(_) => {}
            Err(_) => warnings.push(Warning::BalanceUnknown),
        }

        let native = self.config.fee_settlement == FeeSettlement::NativeValue;
        let price = price_diagnostics(price, native, &mut reasons, &mut warnings);

        let schedule = match fee_table.map_err(|e| e.to_string()).and_then(schedule_from) {
            Ok(s) => Some(s),
            Err(detail) => {
                reasons.push(BlockReason::FeeScheduleUnavailable { detail });
                None
            }
        };

        let token_price = match token_price {
            Ok(p) if !p.is_zero() => Some(p),
            Ok(_) => {
                if !reasons.contains(&BlockReason::UnsupportedToken) {
                    reasons.push(BlockReason::UnsupportedToken);
                }
                None
            }
            // The limit check reported the failed read already.
            Err(_) => None,
        };

        let preview = match (token_price, &schedule) {
            (Some(token_price), Some(schedule)) => Some(self.preview(
                amount,
                decimals_in,
                decimals_out,
                token_price,
                schedule,
                price.as_ref(),
            )?),
            _ => None,
        };

        // Approvals.
        let mut steps = Vec::new();
        let needs_approval = match allowance {
            Ok(current) => {
                if current < amount {
                    if !current.is_zero() && self.config.requires_approval_reset(request.token_in) {
                        steps.push(PlanStep::Approve {
                            token: request.token_in,
                            spender: vault,
                            amount: U256::ZERO,
                        });
                    }
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                debug!(error = %e, "Allowance read failed, including approval");
                warnings.push(Warning::AllowanceUnknown);
                true
            }
        };
        if needs_approval {
            steps.push(PlanStep::Approve {
                token: request.token_in,
                spender: vault,
                amount,
            });
        }

        steps.push(PlanStep::Redeem(RedeemCall {
            vault,
            token_in: request.token_in,
            amount_in: amount,
            token_out: request.redeem_target,
            proof: eligibility.proof.clone(),
            value: preview.as_ref().map_or(U256::ZERO, |p| p.native_fee),
        }));

        let plan = RedeemPlan::new(user, steps, preview, warnings, reasons, eligibility, limit);
        info!(
            %user,
            token = %request.token_in,
            amount = %request.amount,
            ok = plan.ok(),
            steps = plan.steps().len(),
            reasons = plan.reasons().len(),
            warnings = plan.warnings().len(),
            "Redeem plan prepared"
        );
        Ok(plan)
    }

    fn preview(
        &self,
        amount: U256,
        decimals_in: u8,
        decimals_out: u8,
        token_price18: U256,
        schedule: &FeeSchedule,
        price: Option<&PriceResolution>,
    ) -> Result<Preview, PlanError> {
        let gross = token_to_usd_fixed(amount, decimals_in, token_price18)?;
        let breakdown = schedule.breakdown(gross, self.config.tier_mode)?;

        let (paid, native_fee) = match self.config.fee_settlement {
            FeeSettlement::Deducted => (breakdown.net, U256::ZERO),
            FeeSettlement::NativeValue => {
                let native_fee = match price {
                    Some(p) if !breakdown.fee.raw().is_zero() => usd18_to_token(
                        breakdown.fee.to_usd18()?,
                        NATIVE_DECIMALS,
                        p.reading.price18,
                    )?,
                    _ => U256::ZERO,
                };
                (breakdown.gross, native_fee)
            }
        };
        let amount_out = usd_integer_to_stable(paid, decimals_out)?;

        Ok(Preview {
            amount_in: TokenAmount::new(amount, decimals_in),
            gross_usd: breakdown.gross,
            fee_usd: breakdown.fee,
            net_usd: breakdown.net,
            fee_percent: breakdown
                .tier
                .as_ref()
                .map_or_else(|| "0.00%".to_string(), |t| t.fee_percent_text()),
            tier: breakdown.tier,
            amount_out: TokenAmount::new(amount_out, decimals_out),
            native_fee,
            price: price.map(|p| p.reading.clone()),
        })
    }
}

fn schedule_from(table: FeeTable) -> Result<FeeSchedule, String> {
    FeeSchedule::from_pairs(&table.thresholds, &table.bps).map_err(|e| e.to_string())
}

fn eligibility_diagnostics(
    check: &EligibilityCheck,
    reasons: &mut Vec<BlockReason>,
    warnings: &mut Vec<Warning>,
) {
    if check.root_mismatch {
        if let (Some(file_root), Some(chain_root)) = (check.file_root, check.chain_root) {
            warnings.push(Warning::RootMismatch {
                file_root,
                chain_root,
            });
        }
    }
    if let Some(reason) = check.reason {
        let detail = reason.to_string();
        reasons.push(match reason {
            Ineligible::NotWhitelisted | Ineligible::ProofInvalid => {
                BlockReason::NotWhitelisted { detail }
            }
            Ineligible::ProofDataUnavailable | Ineligible::RootUnavailable => {
                BlockReason::EligibilityUnavailable { detail }
            }
        });
    }
}

fn limit_diagnostics(check: &LimitCheck, reasons: &mut Vec<BlockReason>) {
    let Some(issue) = &check.reason else {
        return;
    };
    reasons.push(match issue {
        LimitIssue::ExceedsDailyLimit => BlockReason::ExceedsDailyLimit {
            amount_usd18: check.amount_usd18.unwrap_or_default(),
            remaining_usd18: check.remaining_usd18.unwrap_or_default(),
        },
        LimitIssue::UnsupportedToken => BlockReason::UnsupportedToken,
        other => BlockReason::LimitUnavailable {
            detail: other.to_string(),
        },
    });
}

fn price_diagnostics(
    price: Result<PriceResolution, PriceError>,
    required: bool,
    reasons: &mut Vec<BlockReason>,
    warnings: &mut Vec<Warning>,
) -> Option<PriceResolution> {
    match price {
        Ok(p) => {
            if p.is_override() {
                warnings.push(Warning::PriceOverride);
            } else if p.is_degraded() {
                warnings.push(Warning::PriceDegraded {
                    source_id: p.reading.source_id.clone(),
                });
            }
            Some(p)
        }
        Err(e) => {
            let detail = e.to_string();
            if required {
                reasons.push(BlockReason::PriceUnavailable { detail });
            } else {
                warnings.push(Warning::PriceUnavailable { detail });
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::{DailySpend, TokenSnapshot};
    use crate::chain::{MemoryVault, VaultSnapshot};
    use crate::config::TokenSettings;
    use crate::eligibility::{ProofBook, StaticProofSource};
    use crate::fees::TierMode;
    use crate::math::{Usd, Usd18};
    use std::collections::HashMap;

    const E18: u128 = 1_000_000_000_000_000_000;

    fn user() -> Address {
        Address::repeat_byte(0xaa)
    }
    fn vault_addr() -> Address {
        Address::repeat_byte(0xfe)
    }
    fn claim() -> Address {
        Address::repeat_byte(0x01)
    }
    fn stable() -> Address {
        Address::repeat_byte(0x02)
    }

    fn snapshot() -> VaultSnapshot {
        VaultSnapshot {
            vault: vault_addr(),
            daily_cap_usd: Usd::from_dollars(10_000),
            fee_thresholds: vec![Usd::from_dollars(1000), Usd::from_dollars(100), Usd::from_dollars(500)],
            fee_bps: vec![10, 50, 30],
            oracle_answer: U256::from(600 * E18),
            allowlist: vec![user(), Address::repeat_byte(0xbb), Address::repeat_byte(0xcc)],
            tokens: vec![
                TokenSnapshot::new(claim(), "CLAIM", 18, U256::from(2 * E18))
                    .with_balance(user(), U256::from(1_000 * E18)),
                TokenSnapshot::new(stable(), "USDC", 6, U256::ZERO)
                    .with_liquidity(U256::from(10u64.pow(12))),
            ],
            ..VaultSnapshot::default()
        }
    }

    fn config() -> RedeemConfig {
        RedeemConfig {
            vault: vault_addr(),
            ..RedeemConfig::default()
        }
    }

    fn planner(vault: &Arc<MemoryVault>, config: RedeemConfig) -> RedeemPlanner {
        let s = vault.snapshot();
        let proofs: HashMap<Address, Vec<B256>> = s
            .allowlist
            .iter()
            .map(|a| (*a, s.proof_for(*a).unwrap()))
            .collect();
        let book = ProofBook::new(proofs, Some(s.effective_root()));
        let verifier = EligibilityVerifier::new(vault.clone())
            .with_source(Arc::new(StaticProofSource::new("test", book)));
        RedeemPlanner::new(vault.clone(), config).with_eligibility(verifier)
    }

    fn request(amount: &str) -> RedeemRequest {
        RedeemRequest {
            user: user(),
            token_in: claim(),
            amount: amount.to_string(),
            redeem_target: stable(),
            proof: None,
        }
    }

    // -----------------------------------------------------------------------
    // 1. Happy path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_plan_with_approval_and_preview() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        let plan = planner(&vault, config()).prepare(&request("50")).await.unwrap();

        assert!(plan.ok(), "{:?}", plan.reasons());
        assert_eq!(plan.steps().len(), 2);
        assert_eq!(plan.steps()[0].kind(), StepKind::Approve);
        assert_eq!(plan.steps()[0].amount(), U256::from(50 * E18));
        assert_eq!(plan.steps()[1].kind(), StepKind::Redeem);

        // 50 tokens at $2 = $100 -> tier 1 (50 bps) on the sorted table.
        let preview = plan.preview().unwrap();
        assert_eq!(preview.gross_usd, Usd::from_dollars(100));
        assert_eq!(preview.tier.as_ref().unwrap().index, 1);
        assert_eq!(preview.fee_percent, "0.50%");
        // floor(100 * 50 / 10000) = 0
        assert_eq!(preview.fee_usd, Usd::ZERO);
        assert_eq!(preview.amount_out.raw, U256::from(100_000_000u64));
    }

    #[tokio::test]
    async fn test_sufficient_allowance_skips_approval() {
        let mut snap = snapshot();
        snap.tokens[0] = snap.tokens[0]
            .clone()
            .with_allowance(user(), vault_addr(), U256::from(50 * E18));
        let vault = Arc::new(MemoryVault::new(snap));
        let plan = planner(&vault, config()).prepare(&request("50")).await.unwrap();
        assert_eq!(plan.approval_count(), 0);
        assert_eq!(plan.steps().len(), 1);
    }

    #[tokio::test]
    async fn test_fee_charged_on_large_redemption() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        // 1000 tokens = $2000, above every threshold: cap -> tier 3 (10 bps).
        let plan = planner(&vault, config()).prepare(&request("1000")).await.unwrap();
        let p = plan.preview().unwrap();
        assert_eq!(p.gross_usd, Usd::from_dollars(2000));
        assert_eq!(p.fee_usd, Usd::from_dollars(2));
        assert_eq!(p.net_usd, Usd::from_dollars(1998));
        assert_eq!(p.amount_out.raw, U256::from(1_998_000_000u64));
    }

    #[tokio::test]
    async fn test_native_fee_settlement() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        let cfg = RedeemConfig {
            fee_settlement: FeeSettlement::NativeValue,
            ..config()
        };
        let plan = planner(&vault, cfg).prepare(&request("1000")).await.unwrap();
        let p = plan.preview().unwrap();
        // Full $2000 paid out; $2 fee at $600/native = 1/300 native.
        assert_eq!(p.amount_out.raw, U256::from(2_000_000_000u64));
        assert_eq!(p.native_fee, U256::from(2 * E18 / 600));
        match plan.redeem_step().unwrap() {
            PlanStep::Redeem(call) => assert_eq!(call.value, p.native_fee),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_floor_mode_below_all_thresholds() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        let cfg = RedeemConfig {
            tier_mode: TierMode::Floor,
            ..config()
        };
        let plan = planner(&vault, cfg).prepare(&request("10")).await.unwrap();
        let p = plan.preview().unwrap();
        assert!(p.tier.is_none());
        assert_eq!(p.fee_percent, "0.00%");
        assert_eq!(p.net_usd, Usd::from_dollars(20));
    }

    #[tokio::test]
    async fn test_zero_reset_for_flagged_token() {
        let mut snap = snapshot();
        snap.tokens[0] = snap.tokens[0]
            .clone()
            .with_allowance(user(), vault_addr(), U256::from(E18));
        let vault = Arc::new(MemoryVault::new(snap));
        let cfg = RedeemConfig {
            tokens: vec![TokenSettings {
                address: claim(),
                approval_reset: true,
            }],
            ..config()
        };
        let plan = planner(&vault, cfg).prepare(&request("50")).await.unwrap();
        let amounts: Vec<U256> = plan.approvals().map(|s| s.amount()).collect();
        assert_eq!(amounts, vec![U256::ZERO, U256::from(50 * E18)]);
    }

    // -----------------------------------------------------------------------
    // 2. Blocking reasons
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_all_reasons_accumulate() {
        let mut snap = snapshot();
        snap.round_active = false;
        snap.locked = true;
        snap.allowlist = vec![Address::repeat_byte(0xbb)];
        snap.spent = vec![DailySpend {
            wallet: user(),
            usd18: Usd18::new(U256::from(9_990 * E18)),
        }];
        let vault = Arc::new(MemoryVault::new(snap));
        let plan = planner(&vault, config()).prepare(&request("50")).await.unwrap();

        assert!(!plan.ok());
        let codes: Vec<String> = plan.reasons().iter().map(|r| r.to_string()).collect();
        assert!(codes.iter().any(|c| c.contains("not whitelisted")), "{codes:?}");
        assert!(codes.iter().any(|c| c.contains("exceeds daily limit")));
        assert!(plan.reasons().contains(&BlockReason::RoundNotActive));
        assert!(plan.reasons().contains(&BlockReason::ContractLocked));
        // Still fully described.
        assert!(plan.preview().is_some());
        assert!(plan.redeem_step().is_some());
    }

    #[tokio::test]
    async fn test_insufficient_balance_blocks() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        let plan = planner(&vault, config()).prepare(&request("1001")).await.unwrap();
        assert!(plan
            .reasons()
            .iter()
            .any(|r| matches!(r, BlockReason::InsufficientBalance { .. })));
    }

    #[tokio::test]
    async fn test_price_failure_blocks_only_native_settlement() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        vault.fail_reads("vault_oracle_price");

        let plan = planner(&vault, config()).prepare(&request("50")).await.unwrap();
        assert!(plan.ok());
        assert!(matches!(plan.warnings()[0], Warning::PriceUnavailable { .. }));

        let cfg = RedeemConfig {
            fee_settlement: FeeSettlement::NativeValue,
            ..config()
        };
        let plan = planner(&vault, cfg).prepare(&request("50")).await.unwrap();
        assert!(!plan.ok());
        assert!(matches!(plan.reasons()[0], BlockReason::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_stale_root_is_warning_only() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        let p = planner(&vault, config());
        // Add a member: the chain root moves, but the user's old proof is
        // now invalid, so this is both a warning and a blocking reason.
        vault.update(|s| s.allowlist.push(Address::repeat_byte(0xdd)));
        let plan = p.prepare(&request("50")).await.unwrap();
        assert!(plan
            .warnings()
            .iter()
            .any(|w| matches!(w, Warning::RootMismatch { .. })));
        assert!(!plan.ok());
    }

    // -----------------------------------------------------------------------
    // 3. Input errors
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_bad_amounts_are_errors() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        let p = planner(&vault, config());
        for bad in ["", "abc", "-5", "0", "1e5", "0.0000000000000000001"] {
            assert!(
                matches!(p.prepare(&request(bad)).await, Err(PlanError::InvalidAmount(_))),
                "{bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_token_is_error() {
        let vault = Arc::new(MemoryVault::new(snapshot()));
        let mut req = request("1");
        req.token_in = Address::repeat_byte(0x77);
        assert!(matches!(
            planner(&vault, config()).prepare(&req).await,
            Err(PlanError::Chain(_))
        ));
    }
}
