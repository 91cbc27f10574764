//! # Fees
//!
//! Two unrelated things that both get called "fees":
//!
//! ```text
//! tier.rs   the vault's redemption fee: a basis-point rate picked from a
//!           threshold table by the redemption's USD value
//! gas.rs    the network's transaction fee model: fee-market vs legacy
//!           gas price, chosen per chain
//! ```
//!
//! The redemption fee is part of the preview and must match the contract to
//! the dollar. The gas model only shapes how transactions are submitted and
//! never enters the money math.

pub mod gas;
pub mod tier;

pub use gas::{FeeModel, GasPriceSource, GasStrategy};
pub use tier::{
    resolve_tier, FeeBreakdown, FeeError, FeeSchedule, FeeSettlement, FeeTier, TierMode,
};
