//! # Chain Interfaces
//!
//! Everything the core needs from the vault contract, expressed as two async
//! traits. The RPC plumbing (providers, signers, ABI encoding) lives behind
//! them and is not this crate's business.
//!
//! ```text
//! mod.rs      VaultReader / VaultWriter, request and receipt types, ChainError
//! revert.rs   raw revert / wallet messages -> fixed rejection categories
//! memory.rs   MemoryVault: an in-process vault for tests and simulation
//! ```
//!
//! ## Scale discipline
//!
//! Every USD-valued read returns a scaled newtype: the daily cap and fee
//! thresholds are [`Usd`] (whole dollars), the remaining allowance is
//! [`Usd18`]. Token prices are raw `U256` values documented as 1e18-scaled,
//! because they multiply token amounts rather than stand as dollar values.

pub mod memory;
pub mod revert;

use std::fmt;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fees::FeeModel;
use crate::math::{Usd, Usd18};

pub use memory::{MemoryVault, VaultSnapshot};
pub use revert::{decode_revert, DecodedFailure, RejectionKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures talking to the chain or the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The contract reverted; the raw message is kept for diagnostics.
    #[error("{kind}: {message}")]
    Rejected {
        /// Normalised category.
        kind: RejectionKind,
        /// Raw revert string as reported by the node.
        message: String,
    },

    /// The holder of the signing key refused to sign.
    #[error("signature request declined by the wallet")]
    UserDeclined,

    /// RPC/transport failure. The request may be retried by the caller.
    #[error("rpc transport error: {0}")]
    Transport(String),
}

impl ChainError {
    /// Classifies a raw error string coming back from a node or wallet.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match decode_revert(&message) {
            DecodedFailure::UserDeclined => ChainError::UserDeclined,
            DecodedFailure::Rejection(kind) => ChainError::Rejected { kind, message },
        }
    }

    /// The rejection category, if this is a contract rejection.
    pub fn rejection(&self) -> Option<RejectionKind> {
        match self {
            ChainError::Rejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Read-side types
// ---------------------------------------------------------------------------

/// Round / lock status of the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStatus {
    /// A redemption round is open.
    pub active: bool,
    /// The contract is locked by its operator.
    pub locked: bool,
}

/// A raw oracle answer. Sources that do not report decimals are read as 18.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleAnswer {
    /// Raw answer.
    #[serde(with = "crate::math::serde_u256")]
    pub answer: U256,
    /// Decimals of `answer`, if the source reports them.
    #[serde(default)]
    pub decimals: Option<u8>,
}

/// The fee table exactly as the contract stores it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTable {
    /// Thresholds in whole USD.
    pub thresholds: Vec<Usd>,
    /// Fee rates in basis points, parallel to `thresholds`.
    pub bps: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Write-side types
// ---------------------------------------------------------------------------

/// Arguments of the vault's redeem call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCall {
    /// Vault contract.
    pub vault: Address,
    /// Claim token being redeemed.
    pub token_in: Address,
    /// Raw amount of `token_in`.
    #[serde(with = "crate::math::serde_u256")]
    pub amount_in: U256,
    /// Stable token paid out.
    pub token_out: Address,
    /// Allow-list proof nodes.
    pub proof: Vec<B256>,
    /// Native value attached to the call (wei).
    #[serde(with = "crate::math::serde_u256")]
    pub value: U256,
}

/// A transaction the core asks the wallet to sign and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxRequest {
    /// ERC-20 `approve(spender, amount)`.
    Approve {
        /// Token contract.
        token: Address,
        /// Spender (the vault).
        spender: Address,
        /// New allowance.
        #[serde(with = "crate::math::serde_u256")]
        amount: U256,
    },
    /// Vault redemption.
    Redeem(RedeemCall),
}

impl fmt::Display for TxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxRequest::Approve { token, amount, .. } => write!(f, "approve({}, {})", token, amount),
            TxRequest::Redeem(call) => {
                write!(f, "redeem({}, {} -> {})", call.token_in, call.amount_in, call.token_out)
            }
        }
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash.
    pub hash: B256,
    /// Block the transaction landed in.
    pub block_number: u64,
    /// `true` if execution succeeded.
    pub success: bool,
    /// Revert string for failed transactions, when the node provides one.
    pub revert_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read-only view of the vault and the tokens around it.
///
/// Implementations must be cheap to call concurrently; the planner fans
/// several of these reads out at once.
#[async_trait]
pub trait VaultReader: Send + Sync {
    /// Global per-wallet daily cap in whole USD.
    async fn daily_cap_usd(&self) -> Result<Usd, ChainError>;

    /// What `wallet` may still redeem today, 1e18-scaled.
    async fn remaining_daily_usd18(&self, wallet: Address) -> Result<Usd18, ChainError>;

    /// Fee thresholds and rates.
    async fn fee_table(&self) -> Result<FeeTable, ChainError>;

    /// Fixed USD price of a supported claim token, 1e18-scaled. Zero for
    /// unsupported tokens.
    async fn token_usd_price18(&self, token: Address) -> Result<U256, ChainError>;

    /// The vault's aggregated reference-asset oracle.
    async fn vault_oracle_price(&self) -> Result<OracleAnswer, ChainError>;

    /// A standalone oracle feed.
    async fn feed_price(&self, feed: Address) -> Result<OracleAnswer, ChainError>;

    /// Current allow-list Merkle root.
    async fn allowlist_root(&self) -> Result<B256, ChainError>;

    /// ERC-20 allowance.
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError>;

    /// Round and lock status.
    async fn round_status(&self) -> Result<RoundStatus, ChainError>;

    /// ERC-20 decimals.
    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;

    /// ERC-20 balance.
    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError>;

    /// Live legacy gas-price quote in wei.
    async fn gas_price(&self) -> Result<U256, ChainError>;
}

/// The signing side: submit a transaction, then wait for it to land.
///
/// `submit` returns as soon as the transaction is broadcast. From that point
/// on it cannot be recalled, only observed through `wait_for_receipt`, which
/// may take as long as the chain takes.
#[async_trait]
pub trait VaultWriter: Send + Sync {
    /// Signs and broadcasts `request` from `from`.
    async fn submit(
        &self,
        from: Address,
        request: &TxRequest,
        fees: &FeeModel,
    ) -> Result<B256, ChainError>;

    /// Waits for the transaction to be mined.
    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_message_classifies() {
        assert_eq!(
            ChainError::from_message("MetaMask Tx Signature: User denied transaction signature."),
            ChainError::UserDeclined
        );
        let err = ChainError::from_message("execution reverted: Contract locked");
        assert_eq!(err.rejection(), Some(RejectionKind::ContractLocked));
        assert!(err.to_string().contains("Contract locked"));
    }

    #[test]
    fn tx_request_serializes_with_kind_tag() {
        let req = TxRequest::Approve {
            token: Address::repeat_byte(1),
            spender: Address::repeat_byte(2),
            amount: U256::from(5u64),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "approve");
        assert_eq!(json["amount"], "5");
    }
}
