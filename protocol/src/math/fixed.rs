//! Floor-division conversions between token units and USD.
//!
//! The formulas are lifted straight from the vault's Solidity. A preview that
//! disagrees with the contract by a single wei of USD is a bug, so the tests
//! here pin exact integers rather than "close enough" values.

use std::fmt;

use alloy_primitives::{Uint, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BPS_DENOMINATOR, MAX_TOKEN_DECIMALS, USD_DECIMALS};
use crate::math::amount::format_units;

/// 512-bit intermediate. Two 256-bit factors always fit.
type U512 = Uint<512, 8>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the fixed-point conversions and amount parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    /// Malformed, negative, non-numeric or out-of-range input.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A conversion was asked to divide by a zero price.
    #[error("division by zero: price must be greater than zero")]
    DivisionByZero,

    /// The result does not fit in 256 bits.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

// ---------------------------------------------------------------------------
// Scaled USD Newtypes
// ---------------------------------------------------------------------------

/// Whole US dollars. This is what the contract compares against thresholds
/// and charges fees on.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usd(#[serde(with = "crate::math::serde_u256")] U256);

impl Usd {
    /// Zero dollars.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Wraps a whole-dollar integer.
    pub const fn new(value: U256) -> Self {
        Self(value)
    }

    /// Convenience constructor for small literal values.
    pub fn from_dollars(dollars: u64) -> Self {
        Self(U256::from(dollars))
    }

    /// The underlying integer.
    pub const fn raw(&self) -> U256 {
        self.0
    }

    /// Exact widening to the 1e18 scale.
    pub fn to_usd18(self) -> Result<Usd18, MathError> {
        let scale = pow10(USD_DECIMALS as u32)?;
        self.0
            .checked_mul(scale)
            .map(Usd18)
            .ok_or(MathError::Overflow("Usd::to_usd18"))
    }

    /// Subtraction that refuses to go below zero.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// US dollars scaled by 1e18. The unit of the daily-limit accounting.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usd18(#[serde(with = "crate::math::serde_u256")] U256);

impl Usd18 {
    /// Zero dollars.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Wraps an already 1e18-scaled integer.
    pub const fn new(value: U256) -> Self {
        Self(value)
    }

    /// The underlying integer.
    pub const fn raw(&self) -> U256 {
        self.0
    }

    /// Floor to whole dollars.
    pub fn floor_usd(self) -> Usd {
        usd18_to_usd_integer(self)
    }

    /// Addition that refuses to wrap.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Subtraction that refuses to go below zero.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl fmt::Display for Usd18 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", format_units(self.0, USD_DECIMALS))
    }
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// `10^exp`, or `Overflow` if it does not fit in 256 bits.
pub fn pow10(exp: u32) -> Result<U256, MathError> {
    let ten = U256::from(10u64);
    let mut acc = U256::from(1u64);
    for _ in 0..exp {
        acc = acc.checked_mul(ten).ok_or(MathError::Overflow("pow10"))?;
    }
    Ok(acc)
}

fn widen(value: U256) -> U512 {
    let l = value.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

fn narrow(value: U512) -> Option<U256> {
    let l = value.as_limbs();
    if l[4..].iter().any(|&limb| limb != 0) {
        return None;
    }
    Some(U256::from_limbs([l[0], l[1], l[2], l[3]]))
}

/// `floor(a * b / denominator)` with a 512-bit product.
pub fn mul_div_floor(a: U256, b: U256, denominator: U256) -> Result<U256, MathError> {
    if denominator.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product = widen(a) * widen(b);
    narrow(product / widen(denominator)).ok_or(MathError::Overflow("mul_div_floor"))
}

fn check_decimals(decimals: u8) -> Result<(), MathError> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(MathError::InvalidAmount(format!(
            "token decimals {} exceed the supported maximum of {}",
            decimals, MAX_TOKEN_DECIMALS
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------
//
// Unsigned inputs make "negative" unrepresentable here; signs and junk are
// rejected one layer up, when human strings are parsed (see amount.rs).

/// `floor(amount * price18 / 10^(decimals + 18))`, whole dollars.
pub fn token_to_usd_fixed(amount: U256, decimals: u8, price18: U256) -> Result<Usd, MathError> {
    check_decimals(decimals)?;
    let scale = pow10(decimals as u32 + USD_DECIMALS as u32)?;
    mul_div_floor(amount, price18, scale).map(Usd)
}

/// `floor(usd * 10^(decimals + 18) / price18)`, raw token units.
///
/// Inverse of [`token_to_usd_fixed`]: feeding one into the other never
/// returns more than the original amount.
pub fn usd_fixed_to_token(usd: Usd, decimals: u8, price18: U256) -> Result<U256, MathError> {
    check_decimals(decimals)?;
    if price18.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let scale = pow10(decimals as u32 + USD_DECIMALS as u32)?;
    mul_div_floor(usd.0, scale, price18)
}

/// `usd * 10^stable_decimals`, face value of a 1:1 stable asset.
pub fn usd_integer_to_stable(usd: Usd, stable_decimals: u8) -> Result<U256, MathError> {
    check_decimals(stable_decimals)?;
    let scale = pow10(stable_decimals as u32)?;
    usd.0
        .checked_mul(scale)
        .ok_or(MathError::Overflow("usd_integer_to_stable"))
}

/// `floor(usd18 / 10^18)`.
pub fn usd18_to_usd_integer(usd18: Usd18) -> Usd {
    // 10^18 always fits, and the divisor is non-zero.
    let scale = U256::from(1_000_000_000_000_000_000u64);
    Usd(usd18.0 / scale)
}

/// `floor(amount * price18 / 10^decimals)`, USD18.
pub fn token_to_usd18(amount: U256, decimals: u8, price18: U256) -> Result<Usd18, MathError> {
    check_decimals(decimals)?;
    let scale = pow10(decimals as u32)?;
    mul_div_floor(amount, price18, scale).map(Usd18)
}

/// `floor(usd18 * 10^decimals / price18)`, raw token units.
pub fn usd18_to_token(usd18: Usd18, decimals: u8, price18: U256) -> Result<U256, MathError> {
    check_decimals(decimals)?;
    if price18.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let scale = pow10(decimals as u32)?;
    mul_div_floor(usd18.0, scale, price18)
}

/// `floor(value * bps / 10_000)`.
pub fn apply_bps(value: Usd, bps: u32) -> Result<Usd, MathError> {
    mul_div_floor(value.0, U256::from(bps), U256::from(BPS_DENOMINATOR)).map(Usd)
}

/// Rescales an oracle answer with `decimals` places to 18 places.
///
/// Answers with more than 18 decimals are floored.
pub fn normalize_price(answer: U256, decimals: u8) -> Result<U256, MathError> {
    check_decimals(decimals)?;
    let target = USD_DECIMALS as u32;
    let decimals = decimals as u32;
    if decimals == target {
        Ok(answer)
    } else if decimals < target {
        let factor = pow10(target - decimals)?;
        answer
            .checked_mul(factor)
            .ok_or(MathError::Overflow("normalize_price"))
    } else {
        let divisor = pow10(decimals - target)?;
        Ok(answer / divisor)
    }
}
