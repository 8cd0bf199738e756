// Path: crates/client/src/lib.rs
//! # auditchain Client Crate Lints
//!
//! This crate enforces a strict set of lints to ensure high-quality,
//! panic-free, and well-documented code. Panics are disallowed in non-test
//! code to promote robust error handling.
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

//! # auditchain Client
//!
//! Concrete collaborators for the certification controller: a JSON-RPC chain
//! provider speaking the EIP-1193 method set over HTTP, and an HTTP client for
//! the report backend.

pub mod abi;
pub mod backend;
pub mod jsonrpc;
pub mod provider;

// Re-export for convenience
pub use backend::HttpBackendStore;
pub use provider::JsonRpcChainProvider;
