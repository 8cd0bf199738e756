// Path: crates/types/src/ledger.rs
//! Ledger-side calls, transaction handles, receipts and confirmations.

use crate::network::{ContractAddress, NetworkId};
use crate::report::{ContentFingerprint, ReportId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A call against the certification contract. The wire encoding is owned by
/// the chain provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    /// Appends `(timestamp_or_id, fingerprint)` to the certification log.
    CertifyReport {
        /// Report timestamp, or the report id when no timestamp exists.
        timestamp_or_id: String,
        /// The content fingerprint being certified.
        fingerprint: ContentFingerprint,
    },
    /// Reads the number of certification records (read-only).
    ReportCount,
}

impl LedgerCall {
    /// The contract method name, for logs.
    pub fn method(&self) -> &'static str {
        match self {
            LedgerCall::CertifyReport { .. } => "certifyReport",
            LedgerCall::ReportCount => "reportCount",
        }
    }
}

/// Handle of a submitted transaction (its hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHandle(pub String);

impl TxHandle {
    /// Borrows the transaction hash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A shortened hash for status lines.
    pub fn short(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the network reports a transaction targeted, independent of whether it
/// has been included yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxDetails {
    /// The transaction these details belong to.
    pub tx: TxHandle,
    /// Destination contract; `None` for contract creation or an unparseable address.
    pub to: Option<ContractAddress>,
    /// The decoded call, when the input is a known contract call.
    pub call: Option<LedgerCall>,
}

impl TxDetails {
    /// True when the transaction is exactly `expected` sent to `contract`.
    pub fn matches(&self, contract: &ContractAddress, expected: &LedgerCall) -> bool {
        self.to.as_ref() == Some(contract) && self.call.as_ref() == Some(expected)
    }
}

/// The network's report about an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// The transaction this receipt belongs to.
    pub tx: TxHandle,
    /// Block that included the transaction.
    pub block_number: u64,
    /// Hash of that block, when reported.
    pub block_hash: Option<String>,
    /// False when execution reverted.
    pub succeeded: bool,
    /// Revert reason, when the network reports one.
    pub revert_reason: Option<String>,
}

/// Proof that a certification transaction was included and succeeded.
///
/// The only value that authorizes flipping the backend's certified flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// The certified report.
    pub report_id: ReportId,
    /// The certification transaction.
    pub tx: TxHandle,
    /// Block that included it.
    pub block_number: u64,
    /// Hash of that block, when reported.
    pub block_hash: Option<String>,
    /// Network the transaction was included on.
    pub network: NetworkId,
    /// Local wall-clock time of confirmation, in milliseconds since the epoch.
    pub confirmed_at_ms: u64,
}

impl Confirmation {
    /// Builds a confirmation from a successful receipt.
    pub fn from_receipt(report_id: ReportId, network: NetworkId, receipt: TxReceipt) -> Self {
        Self {
            report_id,
            tx: receipt.tx,
            block_number: receipt.block_number,
            block_hash: receipt.block_hash,
            network,
            confirmed_at_ms: now_ms(),
        }
    }
}

/// Milliseconds since the Unix epoch, saturating to zero on clock skew.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
