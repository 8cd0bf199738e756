// Path: crates/api/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! # auditchain API
//!
//! Traits and interfaces for the collaborators of the certification
//! controller. This crate defines the stable contract between the controller
//! and the systems it drives: the chain provider that owns the active network
//! and signer, and the backend store that owns report metadata.

pub mod cancel;
pub mod mock;
pub mod provider;
pub mod store;

/// A curated set of the most commonly used traits and types.
pub mod prelude {
    pub use crate::cancel::{CancelHandle, CancelSignal};
    pub use crate::provider::ChainProvider;
    pub use crate::store::BackendStore;
}
