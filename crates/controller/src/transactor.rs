// Path: crates/controller/src/transactor.rs
//! Builds, submits and confirms the ledger certification transaction.

use crate::guard::NetworkGuard;
use crate::signals::AttemptSignals;
use auditchain_api::provider::ChainProvider;
use auditchain_telemetry::sinks::MetricsSink;
use auditchain_types::attempt::{AttemptStatus, CancelReason, Step};
use auditchain_types::config::StepTimeouts;
use auditchain_types::error::{CertifyError, ProviderError};
use auditchain_types::ledger::{Confirmation, LedgerCall, TxHandle, TxReceipt};
use auditchain_types::network::{ContractAddress, NetworkId};
use auditchain_types::report::{Report, ReportId};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Receives attempt status transitions as they happen.
pub type Progress<'a> = &'a (dyn Fn(AttemptStatus) + Send + Sync);

/// Maps a provider error at `step` onto the certification taxonomy.
pub fn classify(step: Step, tx: Option<TxHandle>, err: ProviderError) -> CertifyError {
    match err {
        ProviderError::UserRejected => CertifyError::UserCancelled { step },
        ProviderError::Reverted(reason) => CertifyError::LedgerRejected { tx, reason },
        ProviderError::Transport(detail) => CertifyError::TransportFailure { step, tx, detail },
        other => CertifyError::TransportFailure {
            step,
            tx,
            detail: other.to_string(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct CertificationTransactor {
    provider: Arc<dyn ChainProvider>,
    guard: NetworkGuard,
    timeouts: StepTimeouts,
    metrics: &'static dyn MetricsSink,
}

impl CertificationTransactor {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        guard: NetworkGuard,
        timeouts: StepTimeouts,
        metrics: &'static dyn MetricsSink,
    ) -> Self {
        Self {
            provider,
            guard,
            timeouts,
            metrics,
        }
    }

    async fn bounded<T, F>(
        &self,
        step: Step,
        limit: Duration,
        signals: &mut AttemptSignals,
        fut: F,
    ) -> Result<T, CancelReason>
    where
        F: Future<Output = T> + Send,
    {
        signals.bounded(step, limit, self.metrics, fut).await
    }

    /// Reads the active network and requires it to be Compliant.
    async fn gate(&self, signals: &mut AttemptSignals) -> Result<NetworkId, CertifyError> {
        let active = self
            .bounded(
                Step::Gate,
                self.timeouts.requery(),
                signals,
                self.provider.active_network(),
            )
            .await
            .map_err(|reason| CertifyError::Cancelled {
                step: Step::Gate,
                tx: None,
                reason,
            })?
            .map_err(|e| classify(Step::Gate, None, e))?;
        self.guard.require_compliant(active)
    }

    /// Certifies `report` on the ledger and waits for inclusion.
    ///
    /// Returns a [`Confirmation`] only for a receipt reporting success.
    pub async fn certify(
        &self,
        report: &Report,
        signals: &mut AttemptSignals,
        progress: Progress<'_>,
    ) -> Result<Confirmation, CertifyError> {
        let call = certification_call(report)?;

        let network = self.gate(signals).await?;
        let contract = self.guard.contract_for(network)?;

        progress(AttemptStatus::ResolvingSigner);
        let accounts = self
            .bounded(
                Step::ResolveSigner,
                self.timeouts.signer(),
                signals,
                self.provider.request_accounts(),
            )
            .await
            .map_err(|reason| CertifyError::Cancelled {
                step: Step::ResolveSigner,
                tx: None,
                reason,
            })?
            .map_err(|e| classify(Step::ResolveSigner, None, e))?;
        let from = accounts
            .into_iter()
            .next()
            .ok_or_else(|| CertifyError::TransportFailure {
                step: Step::ResolveSigner,
                tx: None,
                detail: "signer returned no accounts".into(),
            })?;

        // The user may have switched networks while the signer prompt was open.
        let current = self.gate(signals).await?;
        if current != network {
            tracing::warn!(target: "certify", report = %report.id, from = %network, to = %current, "network changed before submission");
            return Err(CertifyError::Cancelled {
                step: Step::Gate,
                tx: None,
                reason: CancelReason::NetworkChanged,
            });
        }

        progress(AttemptStatus::Submitting);
        let tx = self
            .bounded(
                Step::Submit,
                self.timeouts.submit(),
                signals,
                self.provider.submit_transaction(&from, &contract, &call),
            )
            .await
            .map_err(|reason| CertifyError::Cancelled {
                step: Step::Submit,
                tx: None,
                reason,
            })?
            .map_err(|e| classify(Step::Submit, None, e))?;
        tracing::info!(target: "certify", report = %report.id, network = %network, tx = %tx, "certification submitted");

        progress(AttemptStatus::AwaitingConfirmation { tx: tx.clone() });
        self.confirm(&report.id, network, tx, signals).await
    }

    /// Waits again for a transaction submitted by an earlier attempt. Never
    /// submits anything.
    ///
    /// `tx` must be `report`'s certification call on the active network's
    /// contract; any other transaction is refused before waiting on it.
    pub async fn resume(
        &self,
        report: &Report,
        tx: TxHandle,
        signals: &mut AttemptSignals,
        progress: Progress<'_>,
    ) -> Result<Confirmation, CertifyError> {
        let call = certification_call(report)?;
        let network = self.gate(signals).await?;
        let contract = self.guard.contract_for(network)?;
        self.verify(&contract, &call, &tx, signals).await?;
        progress(AttemptStatus::AwaitingConfirmation { tx: tx.clone() });
        self.confirm(&report.id, network, tx, signals).await
    }

    /// Requires `tx` to carry exactly `call` to `contract`.
    async fn verify(
        &self,
        contract: &ContractAddress,
        call: &LedgerCall,
        tx: &TxHandle,
        signals: &mut AttemptSignals,
    ) -> Result<(), CertifyError> {
        let details = self
            .bounded(
                Step::Requery,
                self.timeouts.requery(),
                signals,
                self.provider.transaction(tx),
            )
            .await
            .map_err(|reason| CertifyError::Cancelled {
                step: Step::Requery,
                tx: Some(tx.clone()),
                reason,
            })?
            .map_err(|e| classify(Step::Requery, Some(tx.clone()), e))?;
        let mismatch = |detail: String| {
            tracing::warn!(target: "certify", tx = %tx, %detail, "refusing to resume transaction");
            Err(CertifyError::TransactionMismatch {
                tx: tx.clone(),
                detail,
            })
        };
        let Some(details) = details else {
            return mismatch("transaction is unknown to the network".into());
        };
        if details.to.as_ref() != Some(contract) {
            return mismatch(format!(
                "sent to {}, not the certification contract {}",
                details.to.as_ref().map(|a| a.as_str()).unwrap_or("<none>"),
                contract
            ));
        }
        if !details.matches(contract, call) {
            return mismatch(match &details.call {
                Some(LedgerCall::CertifyReport { .. }) => {
                    "certifies a different report or fingerprint".to_string()
                }
                Some(other) => format!("calls {}, not {}", other.method(), call.method()),
                None => "input is not a certification contract call".to_string(),
            });
        }
        Ok(())
    }

    async fn confirm(
        &self,
        report_id: &ReportId,
        network: NetworkId,
        tx: TxHandle,
        signals: &mut AttemptSignals,
    ) -> Result<Confirmation, CertifyError> {
        let waited = self
            .bounded(
                Step::AwaitConfirmation,
                self.timeouts.confirmation(),
                signals,
                self.provider.await_confirmation(&tx),
            )
            .await;
        match waited {
            Ok(Ok(receipt)) => Self::conclude(report_id, network, receipt),
            Ok(Err(e)) => Err(classify(Step::AwaitConfirmation, Some(tx), e)),
            Err(reason) => {
                tracing::warn!(target: "certify", report = %report_id, tx = %tx, %reason, "confirmation wait interrupted, re-querying");
                self.requery(report_id, network, tx, reason).await
            }
        }
    }

    /// One status query bounded by the re-query timeout. It deliberately does
    /// not observe the cancellation signals that interrupted the wait.
    async fn requery(
        &self,
        report_id: &ReportId,
        network: NetworkId,
        tx: TxHandle,
        reason: CancelReason,
    ) -> Result<Confirmation, CertifyError> {
        let started = Instant::now();
        let status =
            tokio::time::timeout(self.timeouts.requery(), self.provider.transaction_status(&tx)).await;
        self.metrics
            .observe_step_duration(Step::Requery.as_str(), started.elapsed().as_secs_f64());
        match status {
            Ok(Ok(Some(receipt))) => Self::conclude(report_id, network, receipt),
            Ok(Ok(None)) => Err(CertifyError::Unconfirmed { tx, reason }),
            Ok(Err(e)) => {
                tracing::warn!(target: "certify", tx = %tx, error = %e, "status re-query failed");
                Err(CertifyError::Unconfirmed { tx, reason })
            }
            Err(_) => {
                tracing::warn!(target: "certify", tx = %tx, "status re-query timed out");
                Err(CertifyError::Unconfirmed { tx, reason })
            }
        }
    }

    fn conclude(
        report_id: &ReportId,
        network: NetworkId,
        receipt: TxReceipt,
    ) -> Result<Confirmation, CertifyError> {
        if receipt.succeeded {
            let confirmation = Confirmation::from_receipt(report_id.clone(), network, receipt);
            tracing::info!(
                target: "certify",
                report = %report_id,
                tx = %confirmation.tx,
                block = confirmation.block_number,
                "certification confirmed"
            );
            Ok(confirmation)
        } else {
            Err(CertifyError::LedgerRejected {
                tx: Some(receipt.tx),
                reason: receipt.revert_reason,
            })
        }
    }
}

/// The ledger call that certifies `report`.
fn certification_call(report: &Report) -> Result<LedgerCall, CertifyError> {
    let fingerprint = report
        .content_fingerprint
        .clone()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| CertifyError::MissingFingerprint(report.id.clone()))?;
    Ok(LedgerCall::CertifyReport {
        timestamp_or_id: report.ledger_key().to_string(),
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditchain_api::cancel::{cancel_pair, CancelSignal};
    use auditchain_api::mock::{ConfirmationScript, MockChainProvider, MOCK_ACCOUNT};
    use auditchain_telemetry::sinks;
    use auditchain_types::network::{NetworkPolicy, GANACHE_ID, MAINNET_ID};
    use auditchain_types::report::ContentFingerprint;

    fn report() -> Report {
        Report {
            id: ReportId::from("r-1"),
            filename: "q1.csv".into(),
            timestamp: "2025-01-02T10:00:00".into(),
            content_fingerprint: Some(ContentFingerprint::new("0xabc123")),
            quality_score: 91.5,
            is_certified: false,
        }
    }

    fn timeouts() -> StepTimeouts {
        StepTimeouts {
            signer_ms: 200,
            switch_ms: 200,
            submit_ms: 200,
            confirmation_ms: 50,
            requery_ms: 200,
            persist_ms: 200,
        }
    }

    fn transactor(provider: &Arc<MockChainProvider>, policy: NetworkPolicy) -> CertificationTransactor {
        CertificationTransactor::new(
            provider.clone(),
            NetworkGuard::new(Arc::new(policy)),
            timeouts(),
            sinks::nop(),
        )
    }

    fn compliant() -> Arc<MockChainProvider> {
        Arc::new(MockChainProvider::new(Some(GANACHE_ID)))
    }

    fn ignore(_: AttemptStatus) {}

    #[tokio::test]
    async fn confirms_successful_receipt() {
        let provider = compliant();
        let confirmation = transactor(&provider, NetworkPolicy::default())
            .certify(&report(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap();
        assert_eq!(confirmation.report_id, ReportId::from("r-1"));
        assert_eq!(confirmation.network, GANACHE_ID);
        let state = provider.state();
        assert_eq!(state.submissions.len(), 1);
        assert_eq!(
            state.submissions[0].call,
            LedgerCall::CertifyReport {
                timestamp_or_id: "2025-01-02T10:00:00".into(),
                fingerprint: ContentFingerprint::new("0xabc123"),
            }
        );
        assert_eq!(confirmation.tx, state.submissions[0].tx);
    }

    #[tokio::test]
    async fn reports_progress_in_order() {
        let provider = compliant();
        let seen = std::sync::Mutex::new(Vec::new());
        let record = |s: AttemptStatus| seen.lock().unwrap().push(s);
        transactor(&provider, NetworkPolicy::default())
            .certify(&report(), &mut AttemptSignals::never(), &record)
            .await
            .unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen[0], AttemptStatus::ResolvingSigner);
        assert_eq!(seen[1], AttemptStatus::Submitting);
        assert!(matches!(seen[2], AttemptStatus::AwaitingConfirmation { .. }));
    }

    #[tokio::test]
    async fn noncompliant_network_never_submits() {
        let provider = Arc::new(MockChainProvider::new(Some(MAINNET_ID)));
        let err = transactor(&provider, NetworkPolicy::default())
            .certify(&report(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, CertifyError::BlockedByPolicy { .. }));
        assert!(provider.state().submissions.is_empty());
    }

    #[tokio::test]
    async fn missing_contract_is_not_deployed() {
        let provider = compliant();
        let policy = NetworkPolicy {
            default_contract: None,
            ..NetworkPolicy::default()
        };
        let err = transactor(&provider, policy)
            .certify(&report(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert_eq!(err, CertifyError::NotDeployed { network: GANACHE_ID });
    }

    #[tokio::test]
    async fn signer_rejection_is_user_cancelled() {
        let provider = Arc::new(MockChainProvider::new(Some(GANACHE_ID)).with(|s| s.reject_signing = true));
        let err = transactor(&provider, NetworkPolicy::default())
            .certify(&report(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert_eq!(err, CertifyError::UserCancelled { step: Step::Submit });
    }

    #[tokio::test]
    async fn reverted_receipt_is_ledger_rejected() {
        let provider = Arc::new(MockChainProvider::new(Some(GANACHE_ID)).with(|s| {
            s.reverts = true;
            s.revert_reason = Some("Already certified".into());
        }));
        let err = transactor(&provider, NetworkPolicy::default())
            .certify(&report(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CertifyError::LedgerRejected { tx: Some(_), reason: Some(ref r) } if r == "Already certified"
        ));
        assert!(!err.is_retry_safe());
    }

    #[tokio::test]
    async fn timed_out_wait_with_included_receipt_still_confirms() {
        let provider = Arc::new(
            MockChainProvider::new(Some(GANACHE_ID)).with(|s| s.confirmation = ConfirmationScript::Never),
        );
        let confirmation = transactor(&provider, NetworkPolicy::default())
            .certify(&report(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap();
        assert_eq!(confirmation.block_number, 1);
        assert_eq!(provider.state().status_queries, 1);
    }

    #[tokio::test]
    async fn timed_out_wait_without_receipt_is_unconfirmed() {
        let provider = Arc::new(MockChainProvider::new(Some(GANACHE_ID)).with(|s| {
            s.confirmation = ConfirmationScript::Never;
            s.included = false;
        }));
        let err = transactor(&provider, NetworkPolicy::default())
            .certify(&report(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CertifyError::Unconfirmed { reason: CancelReason::TimedOut, .. }
        ));
        assert!(err.tx().is_some());
        assert!(!err.is_retry_safe());
    }

    #[tokio::test]
    async fn caller_cancellation_during_wait_re_queries() {
        let provider = Arc::new(MockChainProvider::new(Some(GANACHE_ID)).with(|s| {
            s.confirmation = ConfirmationScript::Never;
            s.included = false;
        }));
        let transactor = CertificationTransactor::new(
            provider.clone(),
            NetworkGuard::new(Arc::new(NetworkPolicy::default())),
            StepTimeouts {
                confirmation_ms: 60_000,
                ..timeouts()
            },
            sinks::nop(),
        );
        let (handle, caller) = cancel_pair();
        let mut signals = AttemptSignals::new(caller, CancelSignal::never());
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.cancel();
        });
        let err = transactor
            .certify(&report(), &mut signals, &ignore)
            .await
            .unwrap_err();
        cancel.await.unwrap();
        assert!(matches!(
            err,
            CertifyError::Unconfirmed { reason: CancelReason::Caller, .. }
        ));
        assert_eq!(provider.state().status_queries, 1);
    }

    #[tokio::test]
    async fn network_change_during_signer_prompt_aborts_before_submit() {
        let provider = Arc::new(MockChainProvider::new(Some(GANACHE_ID)).with(|s| {
            s.signer_delay = Duration::from_millis(50);
        }));
        let switcher = provider.clone();
        let change = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            switcher.set_active(Some(auditchain_types::network::GANACHE_ALT_ID));
        });
        let err = transactor(&provider, NetworkPolicy::default())
            .certify(&report(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        change.await.unwrap();
        assert_eq!(
            err,
            CertifyError::Cancelled {
                step: Step::Gate,
                tx: None,
                reason: CancelReason::NetworkChanged
            }
        );
        assert!(err.is_retry_safe());
        assert!(provider.state().submissions.is_empty());
    }

    #[tokio::test]
    async fn missing_fingerprint_is_rejected_before_any_call() {
        let provider = compliant();
        let mut summary = report();
        summary.content_fingerprint = None;
        let err = transactor(&provider, NetworkPolicy::default())
            .certify(&summary, &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert_eq!(err, CertifyError::MissingFingerprint(ReportId::from("r-1")));
        assert!(provider.state().submissions.is_empty());
    }

    #[tokio::test]
    async fn resume_confirms_without_resubmitting() {
        let provider = compliant();
        let transactor = transactor(&provider, NetworkPolicy::default());
        let tx = provider
            .submit_transaction(
                MOCK_ACCOUNT,
                &NetworkPolicy::default().default_contract.unwrap(),
                &certification_call(&report()).unwrap(),
            )
            .await
            .unwrap();
        let confirmation = transactor
            .resume(&report(), tx.clone(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap();
        assert_eq!(confirmation.tx, tx);
        assert_eq!(confirmation.report_id, ReportId::from("r-1"));
        assert_eq!(provider.state().submissions.len(), 1);
    }

    #[tokio::test]
    async fn resume_refuses_a_transaction_that_is_not_this_certification() {
        let provider = compliant();
        let transactor = transactor(&provider, NetworkPolicy::default());
        let contract = NetworkPolicy::default().default_contract.unwrap();
        let count = provider
            .submit_transaction(MOCK_ACCOUNT, &contract, &LedgerCall::ReportCount)
            .await
            .unwrap();
        let err = transactor
            .resume(&report(), count.clone(), &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, CertifyError::TransactionMismatch { ref tx, .. } if *tx == count));

        let mut other = report();
        other.id = ReportId::from("r-2");
        other.content_fingerprint = Some(ContentFingerprint::new("0xdef456"));
        let foreign = provider
            .submit_transaction(MOCK_ACCOUNT, &contract, &certification_call(&other).unwrap())
            .await
            .unwrap();
        let err = transactor
            .resume(&report(), foreign, &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transaction_mismatch");

        let unknown = TxHandle(format!("0x{:064x}", 0xdead));
        let err = transactor
            .resume(&report(), unknown, &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transaction_mismatch");
    }

    #[tokio::test]
    async fn resume_refuses_a_certification_sent_to_another_contract() {
        let provider = compliant();
        let stranger = ContractAddress::parse("0x000000000000000000000000000000000000dead").unwrap();
        let tx = provider
            .submit_transaction(MOCK_ACCOUNT, &stranger, &certification_call(&report()).unwrap())
            .await
            .unwrap();
        let err = transactor(&provider, NetworkPolicy::default())
            .resume(&report(), tx, &mut AttemptSignals::never(), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, CertifyError::TransactionMismatch { ref detail, .. } if detail.contains("0x000000000000000000000000000000000000dead")));
    }

    #[test]
    fn classification_of_provider_errors() {
        assert_eq!(
            classify(Step::ResolveSigner, None, ProviderError::UserRejected),
            CertifyError::UserCancelled { step: Step::ResolveSigner }
        );
        assert!(matches!(
            classify(Step::Submit, None, ProviderError::Reverted(None)),
            CertifyError::LedgerRejected { tx: None, reason: None }
        ));
        assert!(matches!(
            classify(Step::Submit, None, ProviderError::Rpc { code: -32000, message: "nonce too low".into() }),
            CertifyError::TransportFailure { step: Step::Submit, .. }
        ));
    }
}
