// Path: crates/controller/src/controller.rs
//! The controller facade: composes the guard, negotiator, transactor and
//! coordinator, and publishes a [`ControllerSnapshot`] on every transition.

use crate::guard::NetworkGuard;
use crate::inflight::{InFlightGuard, InFlightRegistry};
use crate::negotiator::ChainSwitchNegotiator;
use crate::reconcile::ReconciliationCoordinator;
use crate::signals::AttemptSignals;
use crate::transactor::{CertificationTransactor, Progress};
use auditchain_api::cancel::CancelSignal;
use auditchain_api::provider::ChainProvider;
use auditchain_api::store::BackendStore;
use auditchain_telemetry::sinks::MetricsSink;
use auditchain_types::attempt::{
    AttemptStatus, CancelReason, CertificationAttempt, ControllerSnapshot, LastError, Step,
};
use auditchain_types::config::{ControllerConfig, StepTimeouts};
use auditchain_types::error::{CertifyError, ControllerError, ProviderError};
use auditchain_types::ledger::{Confirmation, LedgerCall, TxHandle};
use auditchain_types::network::{ComplianceState, ContractAddress, NetworkId};
use auditchain_types::report::{Report, ReportId};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Network-derived state resolved by `connect`. Dropped on every network
/// change and re-resolved on demand.
#[derive(Debug, Default, Clone)]
struct SessionContext {
    account: Option<String>,
    contract: Option<ContractAddress>,
}

/// Result of [`CertificationController::verify_deployment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub network: NetworkId,
    pub contract: ContractAddress,
    /// `reportCount()` as read from the contract.
    pub report_count: u64,
}

#[derive(Debug)]
pub struct CertificationController {
    provider: Arc<dyn ChainProvider>,
    store: Arc<dyn BackendStore>,
    guard: NetworkGuard,
    negotiator: ChainSwitchNegotiator,
    transactor: CertificationTransactor,
    coordinator: ReconciliationCoordinator,
    in_flight: InFlightRegistry,
    context: Mutex<SessionContext>,
    snapshot_tx: watch::Sender<ControllerSnapshot>,
    timeouts: StepTimeouts,
    auto_negotiate: bool,
    metrics: &'static dyn MetricsSink,
}

impl CertificationController {
    pub fn new(
        config: &ControllerConfig,
        provider: Arc<dyn ChainProvider>,
        store: Arc<dyn BackendStore>,
        metrics: &'static dyn MetricsSink,
    ) -> Self {
        let guard = NetworkGuard::new(Arc::new(config.policy.clone()));
        let (snapshot_tx, _) = watch::channel(ControllerSnapshot::default());
        Self {
            negotiator: ChainSwitchNegotiator::new(
                provider.clone(),
                config.timeouts.switch(),
                metrics,
            ),
            transactor: CertificationTransactor::new(
                provider.clone(),
                guard.clone(),
                config.timeouts.clone(),
                metrics,
            ),
            coordinator: ReconciliationCoordinator::new(
                store.clone(),
                config.timeouts.persist(),
                metrics,
            ),
            in_flight: InFlightRegistry::default(),
            context: Mutex::new(SessionContext::default()),
            snapshot_tx,
            timeouts: config.timeouts.clone(),
            auto_negotiate: config.auto_negotiate,
            guard,
            provider,
            store,
            metrics,
        }
    }

    // --- Observation ---

    /// A stream of snapshots; the current one is available immediately.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn guard(&self) -> &NetworkGuard {
        &self.guard
    }

    /// The signer account resolved by the last `connect`, if still valid.
    pub fn account(&self) -> Option<String> {
        self.context().account.clone()
    }

    /// The contract address resolved for the current network, if still valid.
    pub fn contract(&self) -> Option<ContractAddress> {
        self.context().contract.clone()
    }

    /// Confirmed certifications the backend store does not reflect yet.
    pub fn pending_reconciliations(&self) -> Vec<Confirmation> {
        self.coordinator.pending_reconciliations()
    }

    pub fn confirmation_for(&self, id: &ReportId) -> Option<Confirmation> {
        self.coordinator.confirmation_for(id)
    }

    pub fn in_flight_attempts(&self) -> Vec<CertificationAttempt> {
        self.in_flight.attempts()
    }

    pub fn displayed_report(&self) -> Option<Report> {
        self.coordinator.display()
    }

    pub fn cached_listing(&self) -> Vec<Report> {
        self.coordinator.listing()
    }

    // --- Network ---

    /// Reads the active network, switches away from the forbidden one when
    /// needed, then resolves the signer account and contract address.
    pub async fn connect(&self) -> Result<ControllerSnapshot, ControllerError> {
        let result = self.connect_inner().await;
        self.observe(result)
    }

    async fn connect_inner(&self) -> Result<ControllerSnapshot, ControllerError> {
        self.invalidate_context();
        let mut active = self.read_network().await?;
        if self.publish_network(active) == ComplianceState::Noncompliant {
            tracing::info!(target: "negotiate", "connected to the forbidden network, switching");
            self.negotiate().await?;
            active = self.read_network().await?;
            self.publish_network(active);
        }

        let accounts = match timeout(self.timeouts.signer(), self.provider.request_accounts()).await {
            Ok(Ok(accounts)) => accounts,
            Ok(Err(ProviderError::UserRejected)) => {
                return Err(CertifyError::UserCancelled {
                    step: Step::ResolveSigner,
                }
                .into())
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(CertifyError::Cancelled {
                    step: Step::ResolveSigner,
                    tx: None,
                    reason: CancelReason::TimedOut,
                }
                .into())
            }
        };
        let contract = active
            .filter(|n| self.guard.evaluate(Some(*n)) == ComplianceState::Compliant)
            .and_then(|n| self.guard.policy().contract_for(n).cloned());
        let account = accounts.into_iter().next();
        tracing::info!(
            target: "guard",
            network = ?active,
            account = account.as_deref().unwrap_or("<none>"),
            contract = contract.as_ref().map(|c| c.as_str()).unwrap_or("<none>"),
            "connected"
        );
        {
            let mut context = self.context();
            context.account = account;
            context.contract = contract;
        }
        Ok(self.snapshot())
    }

    /// Negotiates a switch to the first compliant candidate and refreshes.
    pub async fn switch_to_compliant(&self) -> Result<NetworkId, ControllerError> {
        let result = self.negotiate().await;
        self.observe(result)
    }

    /// Standalone negotiation: owns the attempt status from `Negotiating`
    /// back to `Idle` or `Failed`.
    async fn negotiate(&self) -> Result<NetworkId, ControllerError> {
        self.set_status(AttemptStatus::Negotiating);
        let result = self.negotiate_with(&mut AttemptSignals::never()).await;
        match &result {
            Ok(_) => self.set_status(AttemptStatus::Idle),
            Err(err) => self.set_status(AttemptStatus::Failed {
                kind: err.kind().to_string(),
            }),
        }
        result
    }

    /// Switches to the first compliant candidate and refreshes, leaving the
    /// attempt status to the caller.
    async fn negotiate_with(
        &self,
        signals: &mut AttemptSignals,
    ) -> Result<NetworkId, ControllerError> {
        let network = self
            .negotiator
            .negotiate(self.guard.candidates(), signals)
            .await?;
        self.refresh_inner().await?;
        Ok(network)
    }

    /// Drops network-derived state and re-evaluates compliance.
    pub async fn refresh(&self) -> Result<ComplianceState, ControllerError> {
        let result = self.refresh_inner().await;
        self.observe(result)
    }

    async fn refresh_inner(&self) -> Result<ComplianceState, ControllerError> {
        self.invalidate_context();
        let active = self.read_network().await?;
        Ok(self.publish_network(active))
    }

    /// Checks that contract code exists on the active network and reads its
    /// record count.
    pub async fn verify_deployment(&self) -> Result<Deployment, ControllerError> {
        let result = self.verify_inner().await;
        self.observe(result)
    }

    async fn verify_inner(&self) -> Result<Deployment, ControllerError> {
        let active = self.read_network().await?;
        self.publish_network(active);
        let network = self.guard.require_compliant(active)?;
        let contract = self.guard.contract_for(network)?;
        if !self
            .query("eth_getCode", self.provider.has_code(&contract))
            .await?
        {
            tracing::warn!(target: "guard", network = %network, contract = %contract, "no contract code at address");
            return Err(CertifyError::NotDeployed { network }.into());
        }
        let raw = self
            .query("reportCount", self.provider.read(&contract, &LedgerCall::ReportCount))
            .await?;
        let report_count = decode_count(&raw).ok_or_else(|| {
            ProviderError::Transport(format!(
                "unexpected reportCount return data ({} bytes)",
                raw.len()
            ))
        })?;
        self.context().contract = Some(contract.clone());
        Ok(Deployment {
            network,
            contract,
            report_count,
        })
    }

    // --- Certification ---

    pub async fn certify(&self, report: &Report) -> Result<Confirmation, ControllerError> {
        self.certify_with_cancel(report, CancelSignal::never()).await
    }

    /// Certifies `report` on the ledger and reconciles the backend.
    ///
    /// A second call for a report that is still in flight fails immediately
    /// with `AlreadyInFlight`. `caller` may interrupt any suspension point.
    pub async fn certify_with_cancel(
        &self,
        report: &Report,
        caller: CancelSignal,
    ) -> Result<Confirmation, ControllerError> {
        let slot = self.claim(report)?;
        tracing::info!(target: "certify", report = %report.id, filename = %report.filename, "certification requested");
        let mut signals = AttemptSignals::new(caller, slot.signal());
        let progress = |status: AttemptStatus| self.progress(&slot, status);
        let outcome = self.run_certify(report, &mut signals, &progress).await;
        self.finish(&report.id, outcome, &progress)
    }

    async fn run_certify(
        &self,
        report: &Report,
        signals: &mut AttemptSignals,
        progress: Progress<'_>,
    ) -> Result<Confirmation, ControllerError> {
        if self.auto_negotiate {
            let active = self.read_network().await?;
            if self.guard.evaluate(active) == ComplianceState::Noncompliant {
                tracing::info!(target: "negotiate", report = %report.id, "certify requested on the forbidden network, switching");
                progress(AttemptStatus::Negotiating);
                self.negotiate_with(signals).await?;
            }
        }
        let confirmation = self.transactor.certify(report, signals, progress).await?;
        self.reconcile_confirmed(confirmation, signals, progress).await
    }

    /// Waits again for `tx`, submitted by an earlier attempt for `report`,
    /// and reconciles once it is confirmed. Never submits a transaction.
    pub async fn resume_confirmation(
        &self,
        report: &Report,
        tx: TxHandle,
    ) -> Result<Confirmation, ControllerError> {
        let slot = self.claim(report)?;
        tracing::info!(target: "certify", report = %report.id, tx = %tx, "resuming confirmation");
        let mut signals = AttemptSignals::new(CancelSignal::never(), slot.signal());
        let progress = |status: AttemptStatus| self.progress(&slot, status);
        let outcome = match self
            .transactor
            .resume(report, tx, &mut signals, &progress)
            .await
        {
            Ok(confirmation) => {
                self.reconcile_confirmed(confirmation, &mut signals, &progress)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        self.finish(&report.id, outcome, &progress)
    }

    /// Retries the backend update for a confirmation this controller
    /// recorded. Never submits a ledger transaction.
    pub async fn retry_reconcile(&self, confirmation: &Confirmation) -> Result<(), ControllerError> {
        let result = self.retry_inner(confirmation).await;
        if let Err(e) = &result {
            self.set_status(AttemptStatus::Failed {
                kind: e.kind().to_string(),
            });
        }
        self.observe(result)
    }

    async fn retry_inner(&self, confirmation: &Confirmation) -> Result<(), ControllerError> {
        let active = self.read_network().await?;
        self.publish_network(active);
        self.guard.require_compliant(active)?;
        self.set_status(AttemptStatus::Reconciling {
            tx: confirmation.tx.clone(),
        });
        self.coordinator.retry_backend_update(confirmation).await?;
        self.set_status(AttemptStatus::Certified {
            confirmation: confirmation.clone(),
        });
        self.clear_error();
        Ok(())
    }

    fn claim(&self, report: &Report) -> Result<InFlightGuard<'_>, ControllerError> {
        self.in_flight.acquire(report).map_err(|e| {
            tracing::info!(target: "certify", report = %report.id, "certification already in flight");
            self.metrics.inc_error(e.kind());
            ControllerError::from(e)
        })
    }

    fn progress(&self, slot: &InFlightGuard<'_>, status: AttemptStatus) {
        slot.record(&status);
        self.set_status(status);
    }

    async fn reconcile_confirmed(
        &self,
        confirmation: Confirmation,
        signals: &mut AttemptSignals,
        progress: Progress<'_>,
    ) -> Result<Confirmation, ControllerError> {
        progress(AttemptStatus::Reconciling {
            tx: confirmation.tx.clone(),
        });
        self.coordinator
            .reconcile(confirmation.clone(), signals)
            .await?;
        Ok(confirmation)
    }

    fn finish(
        &self,
        report_id: &ReportId,
        outcome: Result<Confirmation, ControllerError>,
        progress: Progress<'_>,
    ) -> Result<Confirmation, ControllerError> {
        match &outcome {
            Ok(confirmation) => {
                self.metrics.inc_certifications("certified");
                progress(AttemptStatus::Certified {
                    confirmation: confirmation.clone(),
                });
                self.clear_error();
                tracing::info!(target: "certify", report = %report_id, tx = %confirmation.tx, "report certified");
            }
            Err(e) => {
                self.metrics.inc_certifications(e.kind());
                if let ControllerError::Certify(CertifyError::BlockedByPolicy { network, .. }) = e {
                    self.publish_network(*network);
                }
                let status = match e {
                    ControllerError::Certify(CertifyError::UserCancelled { step })
                    | ControllerError::Certify(CertifyError::Cancelled { step, .. }) => {
                        AttemptStatus::Cancelled { step: *step }
                    }
                    ControllerError::Certify(CertifyError::Unconfirmed { .. }) => {
                        AttemptStatus::Cancelled {
                            step: Step::AwaitConfirmation,
                        }
                    }
                    other => AttemptStatus::Failed {
                        kind: other.kind().to_string(),
                    },
                };
                progress(status);
                self.record_error(e);
            }
        }
        outcome
    }

    // --- Backend ---

    /// Fetches a report and makes it the displayed copy.
    pub async fn load_report(&self, id: &ReportId) -> Result<Report, ControllerError> {
        let result = self
            .store
            .get_report(id)
            .await
            .map(|report| self.coordinator.set_display(report))
            .map_err(ControllerError::from);
        self.observe(result)
    }

    /// Fetches the listing and caches it.
    pub async fn list_reports(&self) -> Result<Vec<Report>, ControllerError> {
        let result = self
            .store
            .list_reports()
            .await
            .map(|reports| self.coordinator.set_listing(reports))
            .map_err(ControllerError::from);
        self.observe(result)
    }

    /// Deletes a report. The cached copies drop it only once the backend
    /// confirmed the deletion.
    pub async fn delete_report(&self, id: &ReportId) -> Result<(), ControllerError> {
        let result = self.store.delete_report(id).await.map_err(ControllerError::from);
        if result.is_ok() {
            self.coordinator.forget(id);
            tracing::info!(target: "backend", report = %id, "report removed from listing");
        }
        self.observe(result)
    }

    // --- Network change stream ---

    /// Reacts to out-of-band network changes until `shutdown` turns true:
    /// publishes compliance, drops cached context and cancels running
    /// attempts when the network turns noncompliant.
    pub fn spawn_network_watcher(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut changes = controller.provider.subscribe_network_changes();
        tokio::spawn(async move {
            let mut last = controller.guard.evaluate(*changes.borrow_and_update());
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            tracing::warn!(target: "guard", "network change stream closed");
                            break;
                        }
                        let network = *changes.borrow_and_update();
                        last = controller.on_network_changed(last, network);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(target: "guard", "network watcher stopped");
        })
    }

    fn on_network_changed(
        &self,
        previous: ComplianceState,
        network: Option<NetworkId>,
    ) -> ComplianceState {
        self.invalidate_context();
        let current = self.publish_network(network);
        tracing::info!(
            target: "guard",
            network = ?network,
            from = %previous,
            to = %current,
            "active network changed"
        );
        if previous == ComplianceState::Compliant && current == ComplianceState::Noncompliant {
            let cancelled = self.in_flight.cancel_all();
            if cancelled > 0 {
                tracing::warn!(target: "guard", cancelled, "network turned noncompliant, cancelling in-flight certifications");
            }
        }
        current
    }

    // --- Helpers ---

    fn context(&self) -> MutexGuard<'_, SessionContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate_context(&self) {
        *self.context() = SessionContext::default();
    }

    async fn query<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ControllerError> {
        let limit = self.timeouts.requery();
        match timeout(limit, fut).await {
            Ok(result) => result.map_err(ControllerError::from),
            Err(_) => Err(ProviderError::Transport(format!("{} timed out after {:?}", what, limit)).into()),
        }
    }

    async fn read_network(&self) -> Result<Option<NetworkId>, ControllerError> {
        self.query("eth_chainId", self.provider.active_network()).await
    }

    fn publish_network(&self, network: Option<NetworkId>) -> ComplianceState {
        let state = self.guard.evaluate(network);
        self.metrics.set_compliance(state.as_str());
        self.snapshot_tx.send_if_modified(|snapshot| {
            let changed = snapshot.compliance != state || snapshot.active_network != network;
            snapshot.compliance = state;
            snapshot.active_network = network;
            changed
        });
        state
    }

    fn set_status(&self, status: AttemptStatus) {
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.attempt_status = status);
    }

    fn clear_error(&self) {
        self.snapshot_tx.send_if_modified(|snapshot| snapshot.last_error.take().is_some());
    }

    fn record_error(&self, err: &ControllerError) {
        self.metrics.inc_error(err.kind());
        if err.is_neutral() {
            tracing::info!(target: "certify", kind = err.kind(), "{}", err);
        } else if matches!(err, ControllerError::Reconcile(_)) {
            tracing::error!(target: "reconcile", kind = err.kind(), "{}", err);
        } else {
            tracing::warn!(target: "certify", kind = err.kind(), retry_safe = err.is_retry_safe(), "{}", err);
        }
        let last_error = LastError {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retry_safe: err.is_retry_safe(),
            neutral: err.is_neutral(),
        };
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.last_error = Some(last_error));
    }

    fn observe<T>(&self, result: Result<T, ControllerError>) -> Result<T, ControllerError> {
        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }
}

/// Decodes a `uint256` return word that fits in 64 bits.
fn decode_count(data: &[u8]) -> Option<u64> {
    let word = data.get(..32)?;
    let (high, low) = word.split_at(24);
    if high.iter().any(|b| *b != 0) {
        return None;
    }
    Some(u64::from_be_bytes(low.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::decode_count;

    #[test]
    fn decodes_count_word() {
        let mut word = vec![0u8; 32];
        word[31] = 7;
        assert_eq!(decode_count(&word), Some(7));
        word[0] = 1;
        assert_eq!(decode_count(&word), None);
        assert_eq!(decode_count(&[0u8; 8]), None);
    }
}
