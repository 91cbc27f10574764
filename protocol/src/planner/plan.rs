//! The plan: what will be signed, what it is worth, and what stands in the
//! way.
//!
//! A [`RedeemPlan`] is built once by the planner and never mutated. Its
//! fields are private so nothing downstream can, say, clear the blocking
//! reasons and hand the result to the executor.

use std::fmt;

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chain::{RedeemCall, TxRequest};
use crate::eligibility::EligibilityCheck;
use crate::fees::FeeTier;
use crate::limits::LimitCheck;
use crate::math::{TokenAmount, Usd, Usd18};
use crate::price::PriceReading;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Step kinds, in the order they appear in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Approve,
    Redeem,
}

/// One transaction of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    /// Set the vault's allowance on the claim token.
    Approve {
        /// Claim token.
        token: Address,
        /// The vault.
        spender: Address,
        /// New allowance.
        #[serde(with = "crate::math::serde_u256")]
        amount: U256,
    },
    /// The redemption itself.
    Redeem(RedeemCall),
}

impl PlanStep {
    pub fn kind(&self) -> StepKind {
        match self {
            PlanStep::Approve { .. } => StepKind::Approve,
            PlanStep::Redeem(_) => StepKind::Redeem,
        }
    }

    /// Token the step moves or approves.
    pub fn token(&self) -> Address {
        match self {
            PlanStep::Approve { token, .. } => *token,
            PlanStep::Redeem(call) => call.token_in,
        }
    }

    /// Raw amount of [`PlanStep::token`].
    pub fn amount(&self) -> U256 {
        match self {
            PlanStep::Approve { amount, .. } => *amount,
            PlanStep::Redeem(call) => call.amount_in,
        }
    }

    /// Approval spender or redemption target.
    pub fn counterparty(&self) -> Address {
        match self {
            PlanStep::Approve { spender, .. } => *spender,
            PlanStep::Redeem(call) => call.vault,
        }
    }

    /// The transaction to submit.
    pub fn to_request(&self) -> TxRequest {
        match self {
            PlanStep::Approve {
                token,
                spender,
                amount,
            } => TxRequest::Approve {
                token: *token,
                spender: *spender,
                amount: *amount,
            },
            PlanStep::Redeem(call) => TxRequest::Redeem(call.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// What the user gives and gets, computed with the vault's integer math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    /// Claim tokens redeemed.
    pub amount_in: TokenAmount,
    /// Value of `amount_in`, whole USD.
    pub gross_usd: Usd,
    /// Fee, whole USD.
    pub fee_usd: Usd,
    /// `gross_usd - fee_usd`.
    pub net_usd: Usd,
    /// The tier that set the rate.
    pub tier: Option<FeeTier>,
    /// `"0.50%"` style rate, `"0.00%"` without a tier.
    pub fee_percent: String,
    /// Stable tokens paid out.
    pub amount_out: TokenAmount,
    /// Native value attached to the redeem call (wei). Zero unless the fee is
    /// settled in native value.
    #[serde(with = "crate::math::serde_u256")]
    pub native_fee: U256,
    /// Reference price used for `native_fee`, if one was resolved.
    pub price: Option<PriceReading>,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Conditions that stop a plan from executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum BlockReason {
    /// No valid allow-list proof for the user.
    NotWhitelisted { detail: String },
    /// Eligibility could not be established either way.
    EligibilityUnavailable { detail: String },
    /// The order is worth more than the wallet may redeem today.
    ExceedsDailyLimit {
        amount_usd18: Usd18,
        remaining_usd18: Usd18,
    },
    /// The daily limit could not be checked.
    LimitUnavailable { detail: String },
    /// No redemption round is open.
    RoundNotActive,
    /// The vault is locked.
    ContractLocked,
    /// Round/lock status could not be read.
    StatusUnavailable { detail: String },
    /// The wallet holds fewer claim tokens than the order.
    InsufficientBalance {
        #[serde(with = "crate::math::serde_u256")]
        balance: U256,
        #[serde(with = "crate::math::serde_u256")]
        required: U256,
    },
    /// The vault does not price the claim token.
    UnsupportedToken,
    /// The fee table could not be read or is malformed.
    FeeScheduleUnavailable { detail: String },
    /// The fee is settled in native value and no price could be resolved.
    PriceUnavailable { detail: String },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::NotWhitelisted { detail } => write!(f, "not whitelisted ({})", detail),
            BlockReason::EligibilityUnavailable { detail } => {
                write!(f, "eligibility unknown: {}", detail)
            }
            BlockReason::ExceedsDailyLimit {
                amount_usd18,
                remaining_usd18,
            } => write!(
                f,
                "exceeds daily limit: order {} but {} remaining",
                amount_usd18, remaining_usd18
            ),
            BlockReason::LimitUnavailable { detail } => {
                write!(f, "daily limit unknown: {}", detail)
            }
            BlockReason::RoundNotActive => f.write_str("round not active"),
            BlockReason::ContractLocked => f.write_str("contract locked"),
            BlockReason::StatusUnavailable { detail } => {
                write!(f, "vault status unknown: {}", detail)
            }
            BlockReason::InsufficientBalance { balance, required } => write!(
                f,
                "insufficient balance: have {} need {}",
                balance, required
            ),
            BlockReason::UnsupportedToken => f.write_str("token is not redeemable"),
            BlockReason::FeeScheduleUnavailable { detail } => {
                write!(f, "fee schedule unavailable: {}", detail)
            }
            BlockReason::PriceUnavailable { detail } => write!(f, "price unavailable: {}", detail),
        }
    }
}

/// Non-blocking signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Warning {
    /// The distributed proof data was generated against another root.
    RootMismatch { file_root: B256, chain_root: B256 },
    /// The primary price provider failed; a fallback answered.
    PriceDegraded { source_id: String },
    /// The manual price override is in effect.
    PriceOverride,
    /// No price could be resolved, but the fee does not need one.
    PriceUnavailable { detail: String },
    /// Allowance read failed; approval is included to be safe.
    AllowanceUnknown,
    /// Balance read failed; the contract will have the final word.
    BalanceUnknown,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::RootMismatch {
                file_root,
                chain_root,
            } => write!(
                f,
                "proof data root {} differs from chain root {}",
                file_root, chain_root
            ),
            Warning::PriceDegraded { source_id } => {
                write!(f, "price source degraded, using {}", source_id)
            }
            Warning::PriceOverride => f.write_str("manual price override in effect"),
            Warning::PriceUnavailable { detail } => write!(f, "price unavailable: {}", detail),
            Warning::AllowanceUnknown => f.write_str("allowance unknown, approval included"),
            Warning::BalanceUnknown => f.write_str("balance unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// RedeemPlan
// ---------------------------------------------------------------------------

/// An immutable, fully previewed redemption.
#[derive(Debug, Clone, Serialize)]
pub struct RedeemPlan {
    user: Address,
    steps: Vec<PlanStep>,
    preview: Option<Preview>,
    warnings: Vec<Warning>,
    reasons: Vec<BlockReason>,
    ok: bool,
    eligibility: EligibilityCheck,
    limit: LimitCheck,
    created_at: DateTime<Utc>,
}

impl RedeemPlan {
    pub(crate) fn new(
        user: Address,
        steps: Vec<PlanStep>,
        preview: Option<Preview>,
        warnings: Vec<Warning>,
        reasons: Vec<BlockReason>,
        eligibility: EligibilityCheck,
        limit: LimitCheck,
    ) -> Self {
        Self {
            user,
            ok: reasons.is_empty(),
            steps,
            preview,
            warnings,
            reasons,
            eligibility,
            limit,
            created_at: Utc::now(),
        }
    }

    /// Whose redemption this is.
    pub fn user(&self) -> Address {
        self.user
    }

    /// `true` iff there are no blocking reasons.
    pub fn ok(&self) -> bool {
        self.ok
    }

    /// Transactions, approvals first, redeem last.
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// The approval steps only.
    pub fn approvals(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.kind() == StepKind::Approve)
    }

    /// Number of approval steps.
    pub fn approval_count(&self) -> usize {
        self.approvals().count()
    }

    /// The redeem step.
    pub fn redeem_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.kind() == StepKind::Redeem)
    }

    /// Value preview, absent when the token price or fee table is unknown.
    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn reasons(&self) -> &[BlockReason] {
        &self.reasons
    }

    /// Eligibility details the plan was built on.
    pub fn eligibility(&self) -> &EligibilityCheck {
        &self.eligibility
    }

    /// Limit details the plan was built on.
    pub fn limit(&self) -> &LimitCheck {
        &self.limit
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::next_daily_reset;

    fn eligibility() -> EligibilityCheck {
        EligibilityCheck {
            ok: true,
            proof: vec![],
            chain_root: Some(B256::ZERO),
            file_root: None,
            root_mismatch: false,
            reason: None,
        }
    }

    fn limit() -> LimitCheck {
        LimitCheck {
            ok: true,
            amount_usd18: None,
            remaining_usd18: None,
            reason: None,
            resets_at: next_daily_reset(Utc::now()),
        }
    }

    fn approve() -> PlanStep {
        PlanStep::Approve {
            token: Address::repeat_byte(1),
            spender: Address::repeat_byte(2),
            amount: U256::from(10u64),
        }
    }

    #[test]
    fn test_ok_iff_no_reasons() {
        let plan = RedeemPlan::new(Address::ZERO, vec![], None, vec![Warning::PriceOverride], vec![], eligibility(), limit());
        assert!(plan.ok());

        let plan = RedeemPlan::new(
            Address::ZERO,
            vec![],
            None,
            vec![],
            vec![BlockReason::RoundNotActive],
            eligibility(),
            limit(),
        );
        assert!(!plan.ok());
    }

    #[test]
    fn test_step_accessors() {
        let step = approve();
        assert_eq!(step.kind(), StepKind::Approve);
        assert_eq!(step.counterparty(), Address::repeat_byte(2));
        assert!(matches!(step.to_request(), TxRequest::Approve { .. }));

        let plan = RedeemPlan::new(Address::ZERO, vec![approve(), approve()], None, vec![], vec![], eligibility(), limit());
        assert_eq!(plan.approval_count(), 2);
        assert!(plan.redeem_step().is_none());
    }

    #[test]
    fn test_reason_serialization_carries_code() {
        let json = serde_json::to_value(BlockReason::ContractLocked).unwrap();
        assert_eq!(json["code"], "contract_locked");
        let json = serde_json::to_value(BlockReason::NotWhitelisted {
            detail: "not whitelisted".into(),
        })
        .unwrap();
        assert_eq!(json["code"], "not_whitelisted");
    }
}
