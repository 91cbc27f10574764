//! Human-readable amounts.
//!
//! Users type `"12.5"`; the contract wants `12500000` (for a 6-decimal
//! token). Parsing is strict: no signs, no exponents, no thousands
//! separators, and no more fractional digits than the token has. Truncating
//! `"0.1234567"` to six decimals would quietly redeem less than the user
//! asked for, so it is rejected instead.

use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::math::fixed::{pow10, MathError};

/// A raw on-chain amount together with the decimals it is scaled by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    /// Raw integer amount in the token's smallest unit.
    #[serde(with = "crate::math::serde_u256")]
    pub raw: U256,
    /// Token decimal count.
    pub decimals: u8,
}

impl TokenAmount {
    /// Wraps a raw amount.
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    /// Parses a human decimal string into raw units.
    pub fn parse(human: &str, decimals: u8) -> Result<Self, MathError> {
        parse_units(human, decimals).map(|raw| Self { raw, decimals })
    }

    /// Returns `true` for a zero amount.
    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    /// Formats back to a human decimal string without trailing zeros.
    pub fn to_human(&self) -> String {
        format_units(self.raw, self.decimals)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human())
    }
}

/// Parses a non-negative decimal string into an integer scaled by
/// `10^decimals`.
pub fn parse_units(human: &str, decimals: u8) -> Result<U256, MathError> {
    let s = human.trim();
    if s.is_empty() {
        return Err(MathError::InvalidAmount("amount is empty".to_string()));
    }
    if s.starts_with('-') {
        return Err(MathError::InvalidAmount(format!(
            "negative amounts are not allowed: {:?}",
            human
        )));
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(MathError::InvalidAmount(format!("not a number: {:?}", human)));
    }
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(MathError::InvalidAmount(format!("not a number: {:?}", human)));
    }
    if frac_part.len() > decimals as usize {
        return Err(MathError::InvalidAmount(format!(
            "{:?} has more than {} decimal places",
            human, decimals
        )));
    }

    let mut digits = String::with_capacity(int_part.len() + decimals as usize);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    for _ in frac_part.len()..decimals as usize {
        digits.push('0');
    }
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }

    // Surface absurd decimal counts as the same error the conversions use.
    pow10(decimals as u32)?;
    U256::from_str_radix(digits, 10)
        .map_err(|_| MathError::InvalidAmount(format!("amount {:?} is too large", human)))
}

/// Formats a raw integer as a decimal string with `decimals` places,
/// trimming trailing zeros (`1500000, 6` → `"1.5"`).
pub fn format_units(raw: U256, decimals: u8) -> String {
    let digits = raw.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_whole_and_fractional() {
        assert_eq!(parse_units("12.5", 6).unwrap(), U256::from(12_500_000u64));
        assert_eq!(parse_units("12", 6).unwrap(), U256::from(12_000_000u64));
        assert_eq!(parse_units(".5", 2).unwrap(), U256::from(50u64));
        assert_eq!(parse_units("5.", 2).unwrap(), U256::from(500u64));
        assert_eq!(parse_units("  0007.25 ", 2).unwrap(), U256::from(725u64));
        assert_eq!(parse_units("0", 18).unwrap(), U256::ZERO);
    }

    #[test]
    fn parse_full_precision() {
        let raw = parse_units("1.000000000000000001", 18).unwrap();
        assert_eq!(raw, U256::from(1_000_000_000_000_000_001u128));
    }

    #[test]
    fn parse_rejects_negative() {
        assert!(matches!(
            parse_units("-1", 6),
            Err(MathError::InvalidAmount(msg)) if msg.contains("negative")
        ));
    }

    #[test]
    fn parse_rejects_junk() {
        for input in ["", "   ", ".", "abc", "1e5", "1,000", "+1", "NaN", "inf", "1.2.3", "0x10"] {
            assert!(
                matches!(parse_units(input, 6), Err(MathError::InvalidAmount(_))),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn parse_rejects_excess_precision() {
        assert!(matches!(
            parse_units("0.1234567", 6),
            Err(MathError::InvalidAmount(msg)) if msg.contains("decimal places")
        ));
    }

    #[test]
    fn parse_rejects_overflow() {
        let huge = "9".repeat(80);
        assert!(matches!(
            parse_units(&huge, 0),
            Err(MathError::InvalidAmount(msg)) if msg.contains("too large")
        ));
    }

    #[test]
    fn format_trims_trailing_zeros() {
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(2_000_000u64), 6), "2");
        assert_eq!(format_units(U256::from(5u64), 6), "0.000005");
        assert_eq!(format_units(U256::ZERO, 6), "0");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
    }

    #[test]
    fn token_amount_display_matches_input() {
        let amount = TokenAmount::parse("1234.5678", 8).unwrap();
        assert_eq!(amount.raw, U256::from(123_456_780_000u64));
        assert_eq!(amount.to_string(), "1234.5678");
        assert!(!amount.is_zero());
    }
}
