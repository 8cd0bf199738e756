// Path: crates/controller/src/negotiator.rs
//! Automatic switching to a compliant network.

use crate::signals::AttemptSignals;
use auditchain_api::provider::ChainProvider;
use auditchain_telemetry::sinks::MetricsSink;
use auditchain_types::attempt::{CancelReason, Step};
use auditchain_types::error::{
    CandidateFailure, CertifyError, ControllerError, NegotiationFailure, ProviderError,
};
use auditchain_types::network::{AllowedNetwork, NetworkId};
use std::sync::Arc;
use std::time::Duration;

/// Progress of a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CandidateState {
    Switch,
    Register,
    RetrySwitch,
    Switched,
    Failed(String),
}

/// Tries compliant candidates in order until the host switches to one.
#[derive(Debug, Clone)]
pub struct ChainSwitchNegotiator {
    provider: Arc<dyn ChainProvider>,
    switch_timeout: Duration,
    metrics: &'static dyn MetricsSink,
}

impl ChainSwitchNegotiator {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        switch_timeout: Duration,
        metrics: &'static dyn MetricsSink,
    ) -> Self {
        Self {
            provider,
            switch_timeout,
            metrics,
        }
    }

    /// Stops at the first candidate the host switches to. On exhaustion every
    /// candidate appears exactly once in the failure, in the order tried.
    ///
    /// A timeout fails only the current candidate. Either cancellation signal
    /// aborts the whole negotiation with [`CertifyError::Cancelled`].
    pub async fn negotiate(
        &self,
        candidates: &[AllowedNetwork],
        signals: &mut AttemptSignals,
    ) -> Result<NetworkId, ControllerError> {
        let mut attempted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.try_candidate(candidate, signals).await {
                Ok(()) => {
                    tracing::info!(target: "negotiate", network = %candidate.id, name = %candidate.name, "switched to compliant network");
                    self.metrics.inc_negotiations("switched");
                    return Ok(candidate.id);
                }
                Err(CandidateError::Failed(reason)) => {
                    tracing::warn!(target: "negotiate", network = %candidate.id, %reason, "candidate failed");
                    attempted.push(CandidateFailure {
                        network: candidate.id,
                        reason,
                    });
                }
                Err(CandidateError::Cancelled { step, reason }) => {
                    tracing::warn!(target: "negotiate", network = %candidate.id, %step, %reason, "negotiation cancelled");
                    self.metrics.inc_negotiations("cancelled");
                    return Err(CertifyError::Cancelled {
                        step,
                        tx: None,
                        reason,
                    }
                    .into());
                }
            }
        }
        self.metrics.inc_negotiations("exhausted");
        Err(NegotiationFailure { attempted }.into())
    }

    async fn try_candidate(
        &self,
        candidate: &AllowedNetwork,
        signals: &mut AttemptSignals,
    ) -> Result<(), CandidateError> {
        let mut state = CandidateState::Switch;
        loop {
            tracing::debug!(target: "negotiate", network = %candidate.id, ?state, "candidate step");
            state = match state {
                CandidateState::Switch => match self.switch(candidate.id, signals).await {
                    Ok(()) => CandidateState::Switched,
                    Err(SwitchError::Provider(ProviderError::UnknownNetwork(_))) => {
                        CandidateState::Register
                    }
                    Err(SwitchError::Cancelled(reason)) => {
                        return Err(CandidateError::Cancelled {
                            step: Step::SwitchNetwork,
                            reason,
                        })
                    }
                    Err(e) => CandidateState::Failed(e.to_string()),
                },
                CandidateState::Register => {
                    let registered = signals
                        .bounded(
                            Step::RegisterNetwork,
                            self.switch_timeout,
                            self.metrics,
                            self.provider.register_network(&candidate.descriptor()),
                        )
                        .await;
                    match registered {
                        Ok(Ok(())) => CandidateState::RetrySwitch,
                        Ok(Err(e)) => CandidateState::Failed(format!("registration failed: {}", e)),
                        Err(CancelReason::TimedOut) => CandidateState::Failed(format!(
                            "registration timed out after {:?}",
                            self.switch_timeout
                        )),
                        Err(reason) => {
                            return Err(CandidateError::Cancelled {
                                step: Step::RegisterNetwork,
                                reason,
                            })
                        }
                    }
                }
                CandidateState::RetrySwitch => match self.switch(candidate.id, signals).await {
                    Ok(()) => CandidateState::Switched,
                    Err(SwitchError::Cancelled(reason)) => {
                        return Err(CandidateError::Cancelled {
                            step: Step::SwitchNetwork,
                            reason,
                        })
                    }
                    Err(e) => CandidateState::Failed(format!("switch after registration failed: {}", e)),
                },
                CandidateState::Switched => return Ok(()),
                CandidateState::Failed(reason) => return Err(CandidateError::Failed(reason)),
            };
        }
    }

    async fn switch(
        &self,
        network: NetworkId,
        signals: &mut AttemptSignals,
    ) -> Result<(), SwitchError> {
        let outcome = match signals
            .bounded(
                Step::SwitchNetwork,
                self.switch_timeout,
                self.metrics,
                self.provider.switch_network(network),
            )
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SwitchError::Provider(e)),
            Err(CancelReason::TimedOut) => Err(SwitchError::TimedOut(self.switch_timeout)),
            Err(reason) => Err(SwitchError::Cancelled(reason)),
        };
        self.metrics.inc_switch_attempts(match &outcome {
            Ok(()) => "switched",
            Err(SwitchError::Provider(ProviderError::UnknownNetwork(_))) => "unknown_network",
            Err(SwitchError::Provider(ProviderError::UserRejected)) => "rejected",
            Err(SwitchError::Provider(_)) => "error",
            Err(SwitchError::TimedOut(_)) => "timed_out",
            Err(SwitchError::Cancelled(_)) => "cancelled",
        });
        outcome
    }
}

/// Why a candidate did not end in `Switched`.
#[derive(Debug)]
enum CandidateError {
    Failed(String),
    Cancelled { step: Step, reason: CancelReason },
}

#[derive(Debug)]
enum SwitchError {
    Provider(ProviderError),
    TimedOut(Duration),
    Cancelled(CancelReason),
}

impl std::fmt::Display for SwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchError::Provider(e) => write!(f, "{}", e),
            SwitchError::TimedOut(limit) => write!(f, "switch timed out after {:?}", limit),
            SwitchError::Cancelled(reason) => write!(f, "switch {}", reason),
        }
    }
}
