// Path: crates/types/src/attempt.rs
//! Certification attempt lifecycle and the observable controller snapshot.

use crate::ledger::{Confirmation, TxHandle};
use crate::network::{ComplianceState, NetworkId};
use crate::report::Report;
use serde::Serialize;
use std::fmt;

/// The suspension points of a certification, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Step {
    /// Reading the active network and checking it against the policy.
    Gate,
    /// Requesting a network switch from the host.
    SwitchNetwork,
    /// Registering an unknown network with the host.
    RegisterNetwork,
    /// Requesting account access from the signer.
    ResolveSigner,
    /// Submitting the certification transaction.
    Submit,
    /// Waiting for the transaction to be included.
    AwaitConfirmation,
    /// Re-querying a transaction after an interrupted wait.
    Requery,
    /// Updating the backend store's certified flag.
    Persist,
}

impl Step {
    /// A stable lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Gate => "gate",
            Step::SwitchNetwork => "switch_network",
            Step::RegisterNetwork => "register_network",
            Step::ResolveSigner => "resolve_signer",
            Step::Submit => "submit",
            Step::AwaitConfirmation => "await_confirmation",
            Step::Requery => "requery",
            Step::Persist => "persist",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What interrupted a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CancelReason {
    /// The caller's cancellation signal fired.
    Caller,
    /// The step's timeout elapsed.
    TimedOut,
    /// The active network left the compliant set.
    NetworkChanged,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CancelReason::Caller => "cancelled by caller",
            CancelReason::TimedOut => "timed out",
            CancelReason::NetworkChanged => "network changed",
        })
    }
}

/// Progress of the most recent certification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub enum AttemptStatus {
    /// No attempt has run yet.
    #[default]
    Idle,
    /// Switching to a compliant network.
    Negotiating,
    /// Waiting for the signer to grant account access.
    ResolvingSigner,
    /// Waiting for the transaction to be accepted.
    Submitting,
    /// Waiting for inclusion of the transaction.
    AwaitingConfirmation {
        /// The submitted transaction.
        tx: TxHandle,
    },
    /// Propagating a confirmation to the backend store.
    Reconciling {
        /// The confirmed transaction.
        tx: TxHandle,
    },
    /// Ledger and backend both record the certification.
    Certified {
        /// The confirmation.
        confirmation: Confirmation,
    },
    /// The user declined or the attempt was interrupted.
    Cancelled {
        /// Step at which it stopped.
        step: Step,
    },
    /// The attempt failed; details are in the snapshot's `last_error`.
    Failed {
        /// Stable error label.
        kind: String,
    },
}

impl AttemptStatus {
    /// True once the attempt can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptStatus::Certified { .. }
                | AttemptStatus::Cancelled { .. }
                | AttemptStatus::Failed { .. }
        )
    }
}

/// One certify operation. Created per user action and discarded after its
/// terminal outcome; never retried automatically.
#[derive(Debug, Clone)]
pub struct CertificationAttempt {
    /// The report as it was when the attempt started.
    pub report: Report,
    /// Local time the attempt started, in milliseconds since the epoch.
    pub submitted_at_ms: u64,
    /// The transaction, once submission returned a handle.
    pub transaction: Option<TxHandle>,
    /// Current progress.
    pub outcome: AttemptStatus,
}

impl CertificationAttempt {
    /// Starts an attempt for `report`.
    pub fn new(report: Report) -> Self {
        Self {
            report,
            submitted_at_ms: crate::ledger::now_ms(),
            transaction: None,
            outcome: AttemptStatus::Idle,
        }
    }
}

/// A cloneable rendering of the last error for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    /// Stable error label.
    pub kind: String,
    /// Human readable message.
    pub message: String,
    /// Whether a manual retry is safe.
    pub retry_safe: bool,
    /// Whether the outcome should be presented as neutral.
    pub neutral: bool,
}

/// The observable state of the controller, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ControllerSnapshot {
    /// Compliance of the active network.
    pub compliance: ComplianceState,
    /// The active network as last read.
    pub active_network: Option<NetworkId>,
    /// Progress of the latest attempt.
    pub attempt_status: AttemptStatus,
    /// The most recent error, cleared by the next success.
    pub last_error: Option<LastError>,
}
