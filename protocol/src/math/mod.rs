//! # Fixed-Point Math
//!
//! The vault contract never sees a float. Neither do we. Every conversion in
//! this module is integer arithmetic with floor division, performed with a
//! 512-bit intermediate so that `amount * price` can never silently wrap.
//!
//! ## Units
//!
//! ```text
//! raw token units    U256, scaled by the token's own decimals
//! Usd                whole dollars (the contract's authoritative unit)
//! Usd18              dollars scaled by 1e18 (client precision)
//! price18            USD per whole token, scaled by 1e18
//! ```
//!
//! Going from `Usd18` to `Usd` is a floor division by 1e18 and nothing else.
//! Going from `Usd` to `Usd18` is an exact multiplication. Round trips lose
//! value, but always in the direction of the vault, never the user's favour.
//!
//! ```text
//! fixed.rs        the conversions and the Usd / Usd18 newtypes
//! amount.rs       human decimal strings <-> raw integer amounts
//! serde_u256.rs   decimal-string serde for U256 fields
//! ```

pub mod amount;
pub mod fixed;
pub mod serde_u256;

pub use amount::{format_units, parse_units, TokenAmount};
pub use fixed::{
    apply_bps, mul_div_floor, normalize_price, pow10, token_to_usd18, token_to_usd_fixed,
    usd18_to_token, usd18_to_usd_integer, usd_fixed_to_token, usd_integer_to_stable, MathError,
    Usd, Usd18,
};
