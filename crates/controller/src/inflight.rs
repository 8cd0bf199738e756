// Path: crates/controller/src/inflight.rs
//! At most one running certification per report.

use auditchain_api::cancel::{cancel_pair, CancelHandle, CancelSignal};
use auditchain_types::attempt::{AttemptStatus, CertificationAttempt};
use auditchain_types::error::CertifyError;
use auditchain_types::report::{Report, ReportId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Slot {
    cancel: CancelHandle,
    attempt: CertificationAttempt,
}

/// Registry of running attempts, keyed by report id.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    slots: Mutex<HashMap<ReportId, Slot>>,
}

impl InFlightRegistry {
    fn slots(&self) -> MutexGuard<'_, HashMap<ReportId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the slot for `report`. Fails immediately with `AlreadyInFlight`
    /// when another attempt holds it; requests are never queued.
    pub fn acquire(&self, report: &Report) -> Result<InFlightGuard<'_>, CertifyError> {
        let mut slots = self.slots();
        if slots.contains_key(&report.id) {
            return Err(CertifyError::AlreadyInFlight(report.id.clone()));
        }
        let (cancel, signal) = cancel_pair();
        slots.insert(
            report.id.clone(),
            Slot {
                cancel,
                attempt: CertificationAttempt::new(report.clone()),
            },
        );
        Ok(InFlightGuard {
            registry: self,
            id: report.id.clone(),
            signal,
        })
    }

    /// Fires the network-change signal of every running attempt and returns
    /// how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let slots = self.slots();
        for slot in slots.values() {
            slot.cancel.cancel();
        }
        slots.len()
    }

    pub fn is_in_flight(&self, id: &ReportId) -> bool {
        self.slots().contains_key(id)
    }

    /// Copies of the running attempts.
    pub fn attempts(&self) -> Vec<CertificationAttempt> {
        self.slots().values().map(|s| s.attempt.clone()).collect()
    }
}

/// Holds a report's slot; releases it on drop, whatever the outcome.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    registry: &'a InFlightRegistry,
    id: ReportId,
    signal: CancelSignal,
}

impl InFlightGuard<'_> {
    /// Fires when the registry cancels this attempt.
    pub fn signal(&self) -> CancelSignal {
        self.signal.clone()
    }

    /// Records progress on the attempt.
    pub fn record(&self, status: &AttemptStatus) {
        if let Some(slot) = self.registry.slots().get_mut(&self.id) {
            match status {
                AttemptStatus::AwaitingConfirmation { tx } | AttemptStatus::Reconciling { tx } => {
                    slot.attempt.transaction = Some(tx.clone());
                }
                _ => {}
            }
            slot.attempt.outcome = status.clone();
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.slots().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditchain_types::ledger::TxHandle;
    use auditchain_types::report::ContentFingerprint;

    fn report(id: &str) -> Report {
        Report {
            id: ReportId::from(id),
            filename: "audit.csv".into(),
            timestamp: "2025-01-02T10:00:00".into(),
            content_fingerprint: Some(ContentFingerprint::new("0xabc")),
            quality_score: 80.0,
            is_certified: false,
        }
    }

    #[test]
    fn second_acquire_fails_until_release() {
        let registry = InFlightRegistry::default();
        let r1 = report("r-1");
        let guard = registry.acquire(&r1).unwrap();
        assert_eq!(
            registry.acquire(&r1).unwrap_err(),
            CertifyError::AlreadyInFlight(r1.id.clone())
        );
        // Other reports are independent.
        let _other = registry.acquire(&report("r-2")).unwrap();
        drop(guard);
        assert!(!registry.is_in_flight(&r1.id));
        assert!(registry.acquire(&r1).is_ok());
    }

    #[test]
    fn cancel_all_signals_every_attempt() {
        let registry = InFlightRegistry::default();
        let a = registry.acquire(&report("r-1")).unwrap();
        let b = registry.acquire(&report("r-2")).unwrap();
        assert_eq!(registry.cancel_all(), 2);
        assert!(a.signal().is_cancelled());
        assert!(b.signal().is_cancelled());
    }

    #[test]
    fn records_progress_on_the_attempt() {
        let registry = InFlightRegistry::default();
        let guard = registry.acquire(&report("r-1")).unwrap();
        let tx = TxHandle("0xfeed".into());
        guard.record(&AttemptStatus::AwaitingConfirmation { tx: tx.clone() });
        let attempts = registry.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].transaction, Some(tx));
        assert!(!attempts[0].outcome.is_terminal());
    }
}
