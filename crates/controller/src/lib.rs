// Path: crates/controller/src/lib.rs
#![forbid(unsafe_code)]
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
//! # auditchain controller
//!
//! Keeps ledger operations on an approved network and drives a report
//! certification from the network check through the ledger transaction to the
//! backend update.
//!
//! - [`guard`] classifies the active network against the policy.
//! - [`negotiator`] switches the host to a compliant network.
//! - [`transactor`] submits and confirms the certification transaction.
//! - [`reconcile`] propagates confirmations to the backend store.
//! - [`inflight`] limits every report to one running attempt.
//! - [`signals`] bounds every suspension point by a timeout and cancellation.
//! - [`controller`] composes the above behind one facade.

pub mod controller;
pub mod guard;
pub mod inflight;
pub mod negotiator;
pub mod reconcile;
pub mod signals;
pub mod transactor;

pub use controller::{CertificationController, Deployment};
pub use guard::NetworkGuard;
pub use negotiator::ChainSwitchNegotiator;
pub use reconcile::ReconciliationCoordinator;
pub use signals::AttemptSignals;
pub use transactor::CertificationTransactor;
