// Copyright (c) 2026 Salvage Contributors. MIT License.
// See LICENSE for details.

//! # Salvage: Redemption Preview & Execution Core
//!
//! A value-recovery vault pays out a stable asset in exchange for claim
//! tokens, charging a tiered fee and enforcing an allow-list and a per-wallet
//! daily limit. Everything the vault decides, it decides with floor-integer
//! math. This crate lets a client preview a redemption with the *same* math
//! before a single transaction is signed, and then drive the approve → redeem
//! sequence to completion.
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! - **math**: Fixed-point conversions between raw token units, whole USD and
//!   1e18-scaled USD. 512-bit intermediates, floor everywhere.
//! - **fees**: Fee-tier resolution (CAP / FLOOR) and the gas fee model.
//! - **eligibility**: Allow-list proofs: loading, caching and local Merkle
//!   recomputation against the on-chain root.
//! - **price**: Ordered, timeout-bounded reference price providers.
//! - **limits**: Daily spending-limit preflight.
//! - **chain**: The read/write seams to the vault contract, revert decoding,
//!   and an in-memory vault for simulation.
//! - **planner**: Composes everything into an immutable [`planner::RedeemPlan`].
//! - **executor**: The session state machine that turns a plan into
//!   confirmed transactions.
//! - **config**: Constants and the serde-loadable [`config::RedeemConfig`].
//!
//! ## Ground Rules
//!
//! 1. No floating point on any money path. Ever.
//! 2. Every USD value carries its scale in its type ([`math::Usd`] vs
//!    [`math::Usd18`]). There is no implicit coercion between them.
//! 3. Reads may time out and fall back. Writes never do: once a transaction
//!    is broadcast we can only watch it land.

pub mod chain;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod fees;
pub mod limits;
pub mod math;
pub mod planner;
pub mod price;

pub use error::{Categorized, ErrorCategory};
pub use executor::{RedeemExecutor, RedeemSession, SessionState};
pub use planner::{RedeemPlan, RedeemPlanner, RedeemRequest};
