//! Error taxonomy.
//!
//! Each module has its own error enum. For the user, though, only five
//! things can go wrong, and they call for different handling: fix the
//! input, try again later, read the contract's answer, or notice that the
//! wallet said no. [`Categorized`] maps every error, blocking reason and
//! warning in the crate onto that short list.

use std::fmt;

use serde::Serialize;

use crate::chain::{ChainError, RejectionKind};
use crate::eligibility::ProofError;
use crate::executor::{ExecutionError, SessionError};
use crate::fees::FeeError;
use crate::math::MathError;
use crate::planner::{BlockReason, PlanError, Warning};
use crate::price::{PriceError, ProviderError};

/// The user-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "category", content = "kind", rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input. Surfaced at once; retrying cannot help.
    Validation,
    /// A data source failed or every fallback did.
    SourceUnavailable,
    /// The contract refused.
    ChainRejection(RejectionKind),
    /// The signing wallet refused.
    UserDeclined,
    /// Cached data disagrees with the chain.
    StaleData,
}

impl ErrorCategory {
    /// Whether repeating the same request later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCategory::SourceUnavailable | ErrorCategory::StaleData)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => f.write_str("validation"),
            ErrorCategory::SourceUnavailable => f.write_str("source unavailable"),
            ErrorCategory::ChainRejection(kind) => write!(f, "chain rejection ({})", kind),
            ErrorCategory::UserDeclined => f.write_str("user declined"),
            ErrorCategory::StaleData => f.write_str("stale data"),
        }
    }
}

/// Anything that can be placed in the taxonomy.
pub trait Categorized {
    fn category(&self) -> ErrorCategory;
}

impl Categorized for MathError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

impl Categorized for FeeError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

impl Categorized for ChainError {
    fn category(&self) -> ErrorCategory {
        match self {
            ChainError::Rejected { kind, .. } => ErrorCategory::ChainRejection(*kind),
            ChainError::UserDeclined => ErrorCategory::UserDeclined,
            ChainError::Transport(_) => ErrorCategory::SourceUnavailable,
        }
    }
}

impl Categorized for ProofError {
    fn category(&self) -> ErrorCategory {
        match self {
            ProofError::Io { .. } | ProofError::Unavailable { .. } => ErrorCategory::SourceUnavailable,
            ProofError::Malformed(_) | ProofError::InvalidHash(_) => ErrorCategory::Validation,
        }
    }
}

impl Categorized for ProviderError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::SourceUnavailable
    }
}

impl Categorized for PriceError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::SourceUnavailable
    }
}

impl Categorized for PlanError {
    fn category(&self) -> ErrorCategory {
        match self {
            PlanError::InvalidAmount(_) => ErrorCategory::Validation,
            PlanError::Chain(e) => e.category(),
            PlanError::Fee(e) => e.category(),
            PlanError::Math(e) => e.category(),
        }
    }
}

impl Categorized for ExecutionError {
    fn category(&self) -> ErrorCategory {
        match self {
            ExecutionError::Blocked(_) | ExecutionError::MissingRedeem => ErrorCategory::Validation,
            ExecutionError::Step { source, .. } => source.category(),
        }
    }
}

impl Categorized for SessionError {
    fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Busy
            | SessionError::InvalidTransition { .. }
            | SessionError::NoPlan => ErrorCategory::Validation,
            SessionError::Superseded => ErrorCategory::StaleData,
            SessionError::Plan(e) => e.category(),
            SessionError::Execution(e) => e.category(),
        }
    }
}

impl Categorized for BlockReason {
    fn category(&self) -> ErrorCategory {
        use RejectionKind as K;
        match self {
            BlockReason::NotWhitelisted { .. } => ErrorCategory::ChainRejection(K::NotWhitelisted),
            BlockReason::RoundNotActive => ErrorCategory::ChainRejection(K::RoundNotStarted),
            BlockReason::ContractLocked => ErrorCategory::ChainRejection(K::ContractLocked),
            BlockReason::InsufficientBalance { .. } => {
                ErrorCategory::ChainRejection(K::InsufficientBalance)
            }
            // The vault reverts on these with its generic message.
            BlockReason::ExceedsDailyLimit { .. } | BlockReason::UnsupportedToken => {
                ErrorCategory::ChainRejection(K::Reverted)
            }
            BlockReason::EligibilityUnavailable { .. }
            | BlockReason::LimitUnavailable { .. }
            | BlockReason::StatusUnavailable { .. }
            | BlockReason::FeeScheduleUnavailable { .. }
            | BlockReason::PriceUnavailable { .. } => ErrorCategory::SourceUnavailable,
        }
    }
}

impl Categorized for Warning {
    fn category(&self) -> ErrorCategory {
        match self {
            Warning::RootMismatch { .. } => ErrorCategory::StaleData,
            Warning::PriceOverride => ErrorCategory::StaleData,
            Warning::PriceDegraded { .. }
            | Warning::PriceUnavailable { .. }
            | Warning::AllowanceUnknown
            | Warning::BalanceUnknown => ErrorCategory::SourceUnavailable,
        }
    }
}
