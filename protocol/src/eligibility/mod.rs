//! # Eligibility
//!
//! Allow-list handling, from raw proof files to a yes/no answer the planner
//! can trust.
//!
//! ```text
//! merkle.rs     keccak sorted-pair Merkle proofs (verify + tree builder)
//! proofs.rs     ProofBook parsing and the ProofSource implementations
//! verifier.rs   EligibilityVerifier: cached book + live root + recomputation
//! ```
//!
//! The guarantee is the strong one: a proof is accepted only if recomputing
//! it locally reproduces the contract's current root. A stale book root is a
//! warning; a proof that does not recompute is a blocking failure, caught
//! here instead of as a revert after the user has already paid gas for the
//! approvals.

pub mod merkle;
pub mod proofs;
pub mod verifier;

pub use proofs::{FileProofSource, ProofBook, ProofError, ProofSource, StaticProofSource};
pub use verifier::{EligibilityCheck, EligibilityVerifier, Ineligible};
