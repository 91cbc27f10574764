//! Revert decoding.
//!
//! Nodes, wallets and libraries all phrase the same failure differently:
//! `execution reverted: Round not started`, `RoundNotStarted()`,
//! `ACTION_REJECTED`, `code 4001`... The UI only cares about a handful of
//! outcomes, so everything is folded into [`RejectionKind`], with the
//! wallet-side refusal split out as its own case.

use std::fmt;

use serde::{Deserialize, Serialize};

/// User-facing rejection categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// No redemption round is open.
    RoundNotStarted,
    /// The vault has no payout liquidity left.
    NoFunds,
    /// The operator locked the contract.
    ContractLocked,
    /// The address (or its proof) is not on the allow-list.
    NotWhitelisted,
    /// The vault may not pull the claim tokens yet.
    InsufficientAllowance,
    /// The wallet does not hold enough claim tokens.
    InsufficientBalance,
    /// Anything else.
    Reverted,
}

impl RejectionKind {
    /// Short message suitable for end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            RejectionKind::RoundNotStarted => "the redemption round has not started",
            RejectionKind::NoFunds => "the vault has no funds available",
            RejectionKind::ContractLocked => "the vault is locked",
            RejectionKind::NotWhitelisted => "this address is not whitelisted",
            RejectionKind::InsufficientAllowance => "token allowance is too low",
            RejectionKind::InsufficientBalance => "token balance is too low",
            RejectionKind::Reverted => "the transaction reverted",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_message())
    }
}

/// What a raw failure message turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedFailure {
    /// The contract said no.
    Rejection(RejectionKind),
    /// The user said no.
    UserDeclined,
}

const USER_DECLINED: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected by user",
    "action_rejected",
    "code 4001",
    "code: 4001",
];

// Checked in order; the first hit wins. Allowance comes before balance
// because OpenZeppelin's "transfer amount exceeds allowance" would otherwise
// match a looser balance pattern in some forks.
const PATTERNS: &[(&[&str], RejectionKind)] = &[
    (&["roundnotstarted", "round not started", "round not active", "roundnotactive"], RejectionKind::RoundNotStarted),
    (&["nofunds", "no funds", "insufficient liquidity"], RejectionKind::NoFunds),
    (&["contractlocked", "contract locked", "is locked"], RejectionKind::ContractLocked),
    (&["notwhitelisted", "not whitelisted", "invalid proof", "invalidproof"], RejectionKind::NotWhitelisted),
    (&["insufficientallowance", "insufficient allowance", "exceeds allowance"], RejectionKind::InsufficientAllowance),
    (&["insufficientbalance", "insufficient balance", "exceeds balance"], RejectionKind::InsufficientBalance),
];

/// Classifies a raw revert or wallet error message.
pub fn decode_revert(message: &str) -> DecodedFailure {
    let lower = message.to_ascii_lowercase();
    if USER_DECLINED.iter().any(|p| lower.contains(p)) {
        return DecodedFailure::UserDeclined;
    }
    for (needles, kind) in PATTERNS {
        if needles.iter().any(|n| lower.contains(n)) {
            return DecodedFailure::Rejection(*kind);
        }
    }
    DecodedFailure::Rejection(RejectionKind::Reverted)
}
