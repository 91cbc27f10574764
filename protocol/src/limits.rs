//! Daily spending-limit preflight.
//!
//! The vault caps how much USD value each wallet may redeem per UTC day. The
//! preflight values the order in `Usd18` with the token's fixed price and
//! compares it against what the contract says is left. Equality passes: the
//! contract's check is `spent + amount <= cap`.
//!
//! A failed read never aborts anything. It produces `ok = false` with a
//! reason, so the planner can report it alongside every other problem.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::chain::VaultReader;
use crate::math::{parse_units, token_to_usd18, Usd18};

/// Why a limit check did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum LimitIssue {
    /// The human amount did not parse.
    InvalidAmount(String),
    /// The vault has no price for the token.
    UnsupportedToken,
    /// The token price could not be read.
    PriceUnavailable(String),
    /// The remaining allowance could not be read.
    RemainingUnavailable(String),
    /// The order is worth more than what is left today.
    ExceedsDailyLimit,
}

impl fmt::Display for LimitIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitIssue::InvalidAmount(e) => write!(f, "invalid amount: {}", e),
            LimitIssue::UnsupportedToken => f.write_str("token has no vault price"),
            LimitIssue::PriceUnavailable(e) => write!(f, "token price unavailable: {}", e),
            LimitIssue::RemainingUnavailable(e) => {
                write!(f, "remaining daily limit unavailable: {}", e)
            }
            LimitIssue::ExceedsDailyLimit => f.write_str("exceeds daily limit"),
        }
    }
}

/// Outcome of a limit preflight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitCheck {
    /// `amount_usd18 <= remaining_usd18`, with both known.
    pub ok: bool,
    /// Order value, if it could be computed.
    pub amount_usd18: Option<Usd18>,
    /// What the wallet may still redeem today, if it could be read.
    pub remaining_usd18: Option<Usd18>,
    /// Set when `ok` is false.
    pub reason: Option<LimitIssue>,
    /// When the daily window rolls over.
    pub resets_at: DateTime<Utc>,
}

/// Next UTC midnight strictly after `now`.
pub fn next_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| Utc.from_utc_datetime(&n))
        .unwrap_or_else(|| now + ChronoDuration::days(1))
}

/// Checks orders against the per-wallet daily cap.
pub struct LimitPreflight {
    reader: Arc<dyn VaultReader>,
}

impl LimitPreflight {
    /// Preflight against the vault behind `reader`.
    pub fn new(reader: Arc<dyn VaultReader>) -> Self {
        Self { reader }
    }

    /// Checks a human-readable amount.
    pub async fn check(
        &self,
        wallet: Address,
        token: Address,
        amount_human: &str,
        decimals: u8,
    ) -> LimitCheck {
        match parse_units(amount_human, decimals) {
            Ok(raw) => self.check_raw(wallet, token, raw, decimals).await,
            Err(e) => LimitCheck {
                ok: false,
                amount_usd18: None,
                remaining_usd18: None,
                reason: Some(LimitIssue::InvalidAmount(e.to_string())),
                resets_at: next_daily_reset(Utc::now()),
            },
        }
    }

    /// Checks an already-parsed raw amount.
    pub async fn check_raw(
        &self,
        wallet: Address,
        token: Address,
        amount: U256,
        decimals: u8,
    ) -> LimitCheck {
        let (price, remaining) = tokio::join!(
            self.reader.token_usd_price18(token),
            self.reader.remaining_daily_usd18(wallet),
        );

        let amount_usd18 = match price {
            Ok(p) if p.is_zero() => Err(LimitIssue::UnsupportedToken),
            Ok(p) => token_to_usd18(amount, decimals, p)
                .map_err(|e| LimitIssue::InvalidAmount(e.to_string())),
            Err(e) => Err(LimitIssue::PriceUnavailable(e.to_string())),
        };
        let remaining = remaining.map_err(|e| LimitIssue::RemainingUnavailable(e.to_string()));

        let reason = match (&amount_usd18, &remaining) {
            (Err(issue), _) | (Ok(_), Err(issue)) => Some(issue.clone()),
            (Ok(amount), Ok(left)) if amount > left => Some(LimitIssue::ExceedsDailyLimit),
            (Ok(_), Ok(_)) => None,
        };

        let check = LimitCheck {
            ok: reason.is_none(),
            amount_usd18: amount_usd18.ok(),
            remaining_usd18: remaining.ok(),
            reason,
            resets_at: next_daily_reset(Utc::now()),
        };
        debug!(
            %wallet,
            %token,
            ok = check.ok,
            amount = ?check.amount_usd18,
            remaining = ?check.remaining_usd18,
            "Daily limit preflight"
        );
        check
    }
}
