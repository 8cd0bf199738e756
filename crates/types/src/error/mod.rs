// Path: crates/types/src/error/mod.rs
//! Core error types for auditchain.
//!
//! Every failure a certification can end in has its own variant so callers can
//! tell user cancellation, network mismatch and persistence failure apart and
//! recover from each individually.

use crate::attempt::{CancelReason, Step};
use crate::ledger::{Confirmation, TxHandle};
use crate::network::{ComplianceState, NetworkId};
use crate::report::ReportId;
use thiserror::Error;

/// Errors reported by a chain provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The host does not know the requested network and it must be registered
    /// first (EIP-1193 code 4902).
    #[error("Network {0} is not registered with the host")]
    UnknownNetwork(NetworkId),
    /// The user declined the request in the signer (EIP-1193 code 4001).
    #[error("Request rejected by the user")]
    UserRejected,
    /// The network accepted the call but execution reverted.
    #[error("Execution reverted: {}", .0.as_deref().unwrap_or("no reason given"))]
    Reverted(Option<String>),
    /// The provider or network could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Any other JSON-RPC error object.
    #[error("Provider error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
}

/// Errors reported by the backend store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend has no report with this id.
    #[error("Report {0} not found")]
    NotFound(ReportId),
    /// The backend answered with a non-success status.
    #[error("Backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The backend could not be reached.
    #[error("Backend transport error: {0}")]
    Transport(String),
    /// The backend answered with a body that could not be decoded.
    #[error("Backend response could not be decoded: {0}")]
    Decode(String),
}

/// Terminal outcomes of a certification attempt other than success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertifyError {
    /// The network guard was not Compliant when the operation was attempted.
    #[error("Blocked by network policy: network {} is {state}", display_network(.network))]
    BlockedByPolicy {
        /// Compliance state at the time of the check.
        state: ComplianceState,
        /// The active network, if one was resolved.
        network: Option<NetworkId>,
    },
    /// The signer declined. A neutral outcome, not a failure.
    #[error("Cancelled by the user during {step}")]
    UserCancelled {
        /// Step at which the user declined.
        step: Step,
    },
    /// The network accepted the transaction but execution reverted.
    #[error("Rejected by the ledger: {}", .reason.as_deref().unwrap_or("execution reverted"))]
    LedgerRejected {
        /// The transaction, if one was created.
        tx: Option<TxHandle>,
        /// Revert reason, when available.
        reason: Option<String>,
    },
    /// The provider or network could not be reached.
    #[error("Transport failure during {step}: {detail}")]
    TransportFailure {
        /// Step that failed.
        step: Step,
        /// The transaction, if one was already created.
        tx: Option<TxHandle>,
        /// Underlying error.
        detail: String,
    },
    /// No certification contract is known for the active network.
    #[error("No certification contract is deployed on network {network}")]
    NotDeployed {
        /// The active network.
        network: NetworkId,
    },
    /// The report has no content fingerprint to certify.
    #[error("Report {0} has no content fingerprint")]
    MissingFingerprint(ReportId),
    /// Another attempt for the same report is still running.
    #[error("A certification for report {0} is already in flight")]
    AlreadyInFlight(ReportId),
    /// The attempt was interrupted before a transaction existed, or during
    /// submission.
    #[error("Certification cancelled during {step} ({reason})")]
    Cancelled {
        /// Step that was interrupted.
        step: Step,
        /// The transaction, if one was already created.
        tx: Option<TxHandle>,
        /// What interrupted it.
        reason: CancelReason,
    },
    /// Waiting for confirmation was interrupted and a status re-query did not
    /// find the transaction included. It may still be included later.
    #[error("Transaction {tx} is not confirmed yet ({reason})")]
    Unconfirmed {
        /// The submitted transaction.
        tx: TxHandle,
        /// What interrupted the wait.
        reason: CancelReason,
    },
    /// A transaction offered for resumption is not this report's
    /// certification call on the configured contract.
    #[error("Transaction {tx} does not certify this report: {detail}")]
    TransactionMismatch {
        /// The offered transaction.
        tx: TxHandle,
        /// What did not match.
        detail: String,
    },
}

fn display_network(network: &Option<NetworkId>) -> String {
    network
        .map(|n| n.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

impl CertifyError {
    /// True when retrying the same certification cannot create a second
    /// ledger transaction.
    pub fn is_retry_safe(&self) -> bool {
        match self {
            CertifyError::TransportFailure { tx, step, .. } => tx.is_none() && *step != Step::Submit,
            CertifyError::Cancelled { tx, step, .. } => tx.is_none() && *step < Step::Submit,
            CertifyError::BlockedByPolicy { .. }
            | CertifyError::UserCancelled { .. }
            | CertifyError::NotDeployed { .. }
            | CertifyError::AlreadyInFlight(_)
            | CertifyError::LedgerRejected { tx: None, .. } => true,
            CertifyError::LedgerRejected { tx: Some(_), .. }
            | CertifyError::MissingFingerprint(_)
            | CertifyError::Unconfirmed { .. }
            | CertifyError::TransactionMismatch { .. } => false,
        }
    }

    /// The transaction already created, if any.
    pub fn tx(&self) -> Option<&TxHandle> {
        match self {
            CertifyError::LedgerRejected { tx, .. }
            | CertifyError::TransportFailure { tx, .. }
            | CertifyError::Cancelled { tx, .. } => tx.as_ref(),
            CertifyError::Unconfirmed { tx, .. } | CertifyError::TransactionMismatch { tx, .. } => {
                Some(tx)
            }
            _ => None,
        }
    }

    /// A stable label for metrics and snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            CertifyError::BlockedByPolicy { .. } => "blocked_by_policy",
            CertifyError::UserCancelled { .. } => "user_cancelled",
            CertifyError::LedgerRejected { .. } => "ledger_rejected",
            CertifyError::TransportFailure { .. } => "transport_failure",
            CertifyError::NotDeployed { .. } => "not_deployed",
            CertifyError::MissingFingerprint(_) => "missing_fingerprint",
            CertifyError::AlreadyInFlight(_) => "already_in_flight",
            CertifyError::Cancelled { .. } => "cancelled",
            CertifyError::Unconfirmed { .. } => "unconfirmed",
            CertifyError::TransactionMismatch { .. } => "transaction_mismatch",
        }
    }
}

/// Why one negotiation candidate could not be switched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// The candidate network.
    pub network: NetworkId,
    /// Description of the last error for that candidate.
    pub reason: String,
}

/// Every compliant candidate was tried and none could be switched to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not switch to any compliant network (tried {})", attempted_list(.attempted))]
pub struct NegotiationFailure {
    /// Each candidate exactly once, in the order tried.
    pub attempted: Vec<CandidateFailure>,
}

fn attempted_list(attempted: &[CandidateFailure]) -> String {
    if attempted.is_empty() {
        return "none".to_string();
    }
    attempted
        .iter()
        .map(|c| c.network.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl NegotiationFailure {
    /// The ids of the candidates tried, in order.
    pub fn attempted_ids(&self) -> Vec<NetworkId> {
        self.attempted.iter().map(|c| c.network).collect()
    }
}

/// The ledger and the backend store disagree, or a backend update was refused.
///
/// With `ledger_confirmed` set, the ledger already holds the certification and
/// only the backend flag update has to be retried, keyed by `confirmation`.
/// Never resubmit a ledger transaction to resolve it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Reconciliation of report {report_id} failed (ledger confirmed: {ledger_confirmed}, backend update failed: {backend_update_failed}): {cause}")]
pub struct ReconcileError {
    /// The report being reconciled.
    pub report_id: ReportId,
    /// The confirmation to retry with, when the ledger holds one.
    pub confirmation: Option<Confirmation>,
    /// The ledger holds a confirmed certification for this report.
    pub ledger_confirmed: bool,
    /// The backend flag update was attempted and failed.
    pub backend_update_failed: bool,
    /// Description of the underlying failure.
    pub cause: String,
}

impl ReconcileError {
    /// The ledger is confirmed but the backend update failed.
    pub fn backend_failed(confirmation: Confirmation, cause: impl ToString) -> Self {
        Self {
            report_id: confirmation.report_id.clone(),
            confirmation: Some(confirmation),
            ledger_confirmed: true,
            backend_update_failed: true,
            cause: cause.to_string(),
        }
    }

    /// A backend update was refused because no ledger confirmation backs it.
    pub fn unconfirmed(report_id: ReportId, cause: impl ToString) -> Self {
        Self {
            report_id,
            confirmation: None,
            ledger_confirmed: false,
            backend_update_failed: false,
            cause: cause.to_string(),
        }
    }
}

/// Errors surfaced by the controller facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The certification attempt ended without a confirmation.
    #[error(transparent)]
    Certify(#[from] CertifyError),
    /// Automatic network switching failed.
    #[error(transparent)]
    Negotiation(#[from] NegotiationFailure),
    /// The ledger is confirmed but the backend is behind.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    /// A backend call outside of reconciliation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A provider call outside of a certification attempt failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ControllerError {
    /// A stable label for metrics and snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Certify(e) => e.kind(),
            ControllerError::Negotiation(_) => "negotiation_failure",
            ControllerError::Reconcile(_) => "reconcile_error",
            ControllerError::Store(_) => "store_error",
            ControllerError::Provider(_) => "provider_error",
        }
    }

    /// True for outcomes that should be shown as neutral rather than as a
    /// failure.
    pub fn is_neutral(&self) -> bool {
        matches!(
            self,
            ControllerError::Certify(CertifyError::UserCancelled { .. })
        )
    }

    /// True when the caller may retry without risking a duplicate ledger
    /// transaction.
    pub fn is_retry_safe(&self) -> bool {
        match self {
            ControllerError::Certify(e) => e.is_retry_safe(),
            ControllerError::Reconcile(e) => e.ledger_confirmed,
            ControllerError::Negotiation(_)
            | ControllerError::Store(_)
            | ControllerError::Provider(_) => true,
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid TOML for the expected schema.
    #[error("Parse error: {0}")]
    Parse(String),
    /// A network id could not be parsed.
    #[error("Invalid network id: {0}")]
    InvalidNetworkId(String),
    /// A contract address failed validation.
    #[error("Invalid contract address '{address}': {reason}")]
    InvalidContractAddress {
        /// The address as written.
        address: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The configuration is structurally invalid.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failure_is_retry_safe_only_without_tx() {
        let before = CertifyError::TransportFailure {
            step: Step::ResolveSigner,
            tx: None,
            detail: "connection refused".into(),
        };
        let after = CertifyError::TransportFailure {
            step: Step::AwaitConfirmation,
            tx: Some(TxHandle("0xfeed".into())),
            detail: "connection reset".into(),
        };
        assert!(before.is_retry_safe());
        assert!(!after.is_retry_safe());
    }

    #[test]
    fn cancellation_during_submit_is_not_retry_safe() {
        let err = CertifyError::Cancelled {
            step: Step::Submit,
            tx: None,
            reason: CancelReason::TimedOut,
        };
        assert!(!err.is_retry_safe());
    }

    #[test]
    fn transaction_mismatch_keeps_the_offered_tx() {
        let err = CertifyError::TransactionMismatch {
            tx: TxHandle("0xbeef".into()),
            detail: "call is reportCount".into(),
        };
        assert!(!err.is_retry_safe());
        assert_eq!(err.tx(), Some(&TxHandle("0xbeef".into())));
        assert_eq!(err.kind(), "transaction_mismatch");
    }

    #[test]
    fn user_cancelled_is_neutral() {
        let err: ControllerError = CertifyError::UserCancelled {
            step: Step::Submit,
        }
        .into();
        assert!(err.is_neutral());
        assert_eq!(err.kind(), "user_cancelled");
    }

    #[test]
    fn negotiation_failure_lists_candidates_in_order() {
        let failure = NegotiationFailure {
            attempted: vec![
                CandidateFailure {
                    network: NetworkId(5777),
                    reason: "rejected".into(),
                },
                CandidateFailure {
                    network: NetworkId(1337),
                    reason: "timeout".into(),
                },
            ],
        };
        assert_eq!(failure.attempted_ids(), vec![NetworkId(5777), NetworkId(1337)]);
        assert!(failure.to_string().contains("5777, 1337"));
    }

    #[test]
    fn blocked_by_policy_message_names_network() {
        let err = CertifyError::BlockedByPolicy {
            state: ComplianceState::Noncompliant,
            network: Some(NetworkId(1)),
        };
        assert_eq!(
            err.to_string(),
            "Blocked by network policy: network 1 is noncompliant"
        );
    }
}
