// Path: crates/controller/src/signals.rs
//! Cancellation sources observed at every suspension point of an attempt.

use auditchain_api::cancel::CancelSignal;
use auditchain_telemetry::sinks::MetricsSink;
use auditchain_types::attempt::{CancelReason, Step};
use std::future::Future;
use std::time::{Duration, Instant};

/// The two cancellation sources an attempt observes at every suspension
/// point.
#[derive(Debug, Clone)]
pub struct AttemptSignals {
    caller: CancelSignal,
    network: CancelSignal,
}

impl AttemptSignals {
    /// `caller` is supplied by whoever started the attempt; `network` fires
    /// when the active network leaves the compliant set.
    pub fn new(caller: CancelSignal, network: CancelSignal) -> Self {
        Self { caller, network }
    }

    /// Signals that never fire.
    pub fn never() -> Self {
        Self::new(CancelSignal::never(), CancelSignal::never())
    }

    /// Runs `fut` as suspension point `step`: bounded by `limit` and
    /// interrupted by either signal. The caller wins ties, then the network.
    pub(crate) async fn bounded<T, F>(
        &mut self,
        step: Step,
        limit: Duration,
        metrics: &dyn MetricsSink,
        fut: F,
    ) -> Result<T, CancelReason>
    where
        F: Future<Output = T> + Send,
    {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = self.caller.cancelled() => Err(CancelReason::Caller),
            _ = self.network.cancelled() => Err(CancelReason::NetworkChanged),
            res = tokio::time::timeout(limit, fut) => res.map_err(|_| CancelReason::TimedOut),
        };
        metrics.observe_step_duration(step.as_str(), started.elapsed().as_secs_f64());
        outcome
    }
}
