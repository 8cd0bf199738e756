// Path: crates/api/src/store.rs
//! Defines the `BackendStore` trait, the mutable system of record for report
//! metadata.

use async_trait::async_trait;
use auditchain_types::error::StoreError;
use auditchain_types::report::{Report, ReportId};
use std::fmt::Debug;

/// The backend store.
///
/// Authoritative for report metadata and listings. Its `is_certified` flag is
/// a projection of the ledger and may lag behind it.
#[async_trait]
pub trait BackendStore: Debug + Send + Sync {
    /// Sets the report's certified flag. Idempotent.
    async fn update_certification_flag(&self, id: &ReportId) -> Result<(), StoreError>;

    /// Fetches the full report.
    async fn get_report(&self, id: &ReportId) -> Result<Report, StoreError>;

    /// Lists report summaries, newest first.
    async fn list_reports(&self) -> Result<Vec<Report>, StoreError>;

    /// Deletes the report.
    async fn delete_report(&self, id: &ReportId) -> Result<(), StoreError>;
}
