// Path: crates/controller/src/reconcile.rs
//! Propagates ledger confirmations to the backend store.
//!
//! The ledger is written first and is irreversible; the backend flag is a
//! projection of it, updated second and retried idempotently keyed by the
//! [`Confirmation`]. A report's flag is only ever set when a confirmation for
//! it has been recorded here.

use crate::signals::AttemptSignals;
use auditchain_api::store::BackendStore;
use auditchain_telemetry::sinks::MetricsSink;
use auditchain_types::attempt::{CancelReason, Step};
use auditchain_types::error::ReconcileError;
use auditchain_types::ledger::Confirmation;
use auditchain_types::report::{Report, ReportId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct LedgerView {
    confirmed: HashMap<ReportId, Confirmation>,
    pending: BTreeMap<ReportId, Confirmation>,
    display: Option<Report>,
    listing: Vec<Report>,
}

impl LedgerView {
    fn overlay(&self, report: &mut Report) {
        if self.confirmed.contains_key(&report.id) {
            report.is_certified = true;
        }
    }

    fn mark_display(&mut self, id: &ReportId) {
        if let Some(display) = self.display.as_mut().filter(|r| &r.id == id) {
            display.is_certified = true;
        }
    }

    fn mark_listing(&mut self, id: &ReportId) {
        for report in self.listing.iter_mut().filter(|r| &r.id == id) {
            report.is_certified = true;
        }
    }
}

/// Owns the confirmed-ledger registry, the pending-reconciliation set and the
/// locally displayed copies of backend data.
#[derive(Debug)]
pub struct ReconciliationCoordinator {
    store: Arc<dyn BackendStore>,
    persist_timeout: Duration,
    metrics: &'static dyn MetricsSink,
    view: Mutex<LedgerView>,
}

impl ReconciliationCoordinator {
    pub fn new(
        store: Arc<dyn BackendStore>,
        persist_timeout: Duration,
        metrics: &'static dyn MetricsSink,
    ) -> Self {
        Self {
            store,
            persist_timeout,
            metrics,
            view: Mutex::new(LedgerView::default()),
        }
    }

    fn view(&self) -> MutexGuard<'_, LedgerView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `confirmation`, marks the displayed and listed copies certified
    /// and updates the backend flag. Called once per confirmed certification.
    ///
    /// `signals` interrupt the backend update only; the confirmation stays
    /// recorded and pending for [`Self::retry_backend_update`].
    pub async fn reconcile(
        &self,
        confirmation: Confirmation,
        signals: &mut AttemptSignals,
    ) -> Result<(), ReconcileError> {
        {
            let mut view = self.view();
            view.confirmed
                .insert(confirmation.report_id.clone(), confirmation.clone());
            view.mark_display(&confirmation.report_id);
            view.mark_listing(&confirmation.report_id);
        }
        self.persist(confirmation, signals).await
    }

    /// Re-runs the backend update for a recorded confirmation. Never touches
    /// the ledger.
    pub async fn retry_backend_update(&self, confirmation: &Confirmation) -> Result<(), ReconcileError> {
        let recorded = self.view().confirmed.get(&confirmation.report_id).cloned();
        match recorded {
            Some(recorded) if recorded.tx == confirmation.tx => {
                self.persist(recorded, &mut AttemptSignals::never()).await
            }
            Some(recorded) => Err(ReconcileError::unconfirmed(
                confirmation.report_id.clone(),
                format!(
                    "transaction {} does not match the recorded confirmation {}",
                    confirmation.tx, recorded.tx
                ),
            )),
            None => Err(ReconcileError::unconfirmed(
                confirmation.report_id.clone(),
                "no ledger confirmation recorded for this report",
            )),
        }
    }

    async fn persist(
        &self,
        confirmation: Confirmation,
        signals: &mut AttemptSignals,
    ) -> Result<(), ReconcileError> {
        let id = confirmation.report_id.clone();
        let outcome = signals
            .bounded(
                Step::Persist,
                self.persist_timeout,
                self.metrics,
                self.store.update_certification_flag(&id),
            )
            .await;
        let cause = match outcome {
            Ok(Ok(())) => {
                let pending = {
                    let mut view = self.view();
                    view.pending.remove(&id);
                    view.pending.len()
                };
                self.metrics.set_pending_reconciliations(pending);
                tracing::info!(target: "reconcile", report = %id, tx = %confirmation.tx, "backend reflects ledger certification");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(CancelReason::TimedOut) => {
                format!("backend update timed out after {:?}", self.persist_timeout)
            }
            Err(reason) => format!("backend update cancelled ({})", reason),
        };
        let pending = {
            let mut view = self.view();
            view.pending.insert(id.clone(), confirmation.clone());
            view.pending.len()
        };
        self.metrics.inc_reconcile_failures();
        self.metrics.set_pending_reconciliations(pending);
        tracing::error!(
            target: "reconcile",
            report = %id,
            tx = %confirmation.tx,
            %cause,
            "ledger confirmed but backend update failed"
        );
        Err(ReconcileError::backend_failed(confirmation, cause))
    }

    /// Confirmations the backend does not reflect yet.
    pub fn pending_reconciliations(&self) -> Vec<Confirmation> {
        self.view().pending.values().cloned().collect()
    }

    pub fn confirmation_for(&self, id: &ReportId) -> Option<Confirmation> {
        self.view().confirmed.get(id).cloned()
    }

    /// Replaces the displayed report. Returns it with confirmations known to
    /// this process applied.
    pub fn set_display(&self, mut report: Report) -> Report {
        let mut view = self.view();
        view.overlay(&mut report);
        view.display = Some(report.clone());
        report
    }

    pub fn display(&self) -> Option<Report> {
        self.view().display.clone()
    }

    /// Replaces the cached listing, applying known confirmations.
    pub fn set_listing(&self, mut reports: Vec<Report>) -> Vec<Report> {
        let mut view = self.view();
        for report in &mut reports {
            view.overlay(report);
        }
        view.listing = reports.clone();
        reports
    }

    pub fn listing(&self) -> Vec<Report> {
        self.view().listing.clone()
    }

    /// Drops a deleted report from the listing and the display.
    pub fn forget(&self, id: &ReportId) {
        let mut view = self.view();
        view.listing.retain(|r| &r.id != id);
        if view.display.as_ref().is_some_and(|r| &r.id == id) {
            view.display = None;
        }
    }
}
