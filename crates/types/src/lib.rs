// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # auditchain Types
//!
//! The foundational library for auditchain, containing the data model shared by
//! the certification controller and its collaborators.
//!
//! ## Architectural Role
//!
//! As the base crate, `auditchain-types` has minimal dependencies and is a
//! dependency of every other crate in the workspace. It owns the canonical
//! definitions of network identifiers, the network policy, reports, ledger
//! receipts, the observable controller snapshot and every error enum.

/// Certification attempt lifecycle and the observable controller snapshot.
pub mod attempt;
/// Configuration structures loaded from TOML.
pub mod config;
/// A unified set of all error types used across auditchain.
pub mod error;
/// Ledger-side calls, transaction handles, receipts and confirmations.
pub mod ledger;
/// Network identifiers, registration descriptors and the network policy.
pub mod network;
/// Audit reports as held by the backend store.
pub mod report;
