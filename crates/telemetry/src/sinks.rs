// Path: crates/telemetry/src/sinks.rs
//! Defines abstract traits for metrics reporting, decoupling the controller
//! from the metrics backend.

/// A no-op sink for use in tests where metrics are not needed.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

// --- Trait Definitions ---

pub trait NetworkMetricsSink: Send + Sync + std::fmt::Debug {
    /// Records the compliance state of the active network.
    fn set_compliance(&self, state: &'static str);
    /// Counts one negotiation run by result (`switched`, `exhausted`).
    fn inc_negotiations(&self, result: &'static str);
    /// Counts one candidate switch attempt by result.
    fn inc_switch_attempts(&self, result: &'static str);
}
impl NetworkMetricsSink for NopSink {
    fn set_compliance(&self, _state: &'static str) {}
    fn inc_negotiations(&self, _result: &'static str) {}
    fn inc_switch_attempts(&self, _result: &'static str) {}
}

pub trait LedgerMetricsSink: Send + Sync + std::fmt::Debug {
    /// Counts one finished certification attempt by outcome.
    fn inc_certifications(&self, outcome: &'static str);
    /// Observes the latency of one suspension point.
    fn observe_step_duration(&self, step: &'static str, duration_secs: f64);
}
impl LedgerMetricsSink for NopSink {
    fn inc_certifications(&self, _outcome: &'static str) {}
    fn observe_step_duration(&self, _step: &'static str, _duration_secs: f64) {}
}

pub trait ReconcileMetricsSink: Send + Sync + std::fmt::Debug {
    /// Counts a backend update that failed after ledger confirmation.
    fn inc_reconcile_failures(&self);
    /// Records how many confirmed certifications the backend does not reflect yet.
    fn set_pending_reconciliations(&self, count: usize);
}
impl ReconcileMetricsSink for NopSink {
    fn inc_reconcile_failures(&self) {}
    fn set_pending_reconciliations(&self, _count: usize) {}
}

/// A sink for recording error metrics.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for a specific error.
    fn inc_error(&self, kind: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str) {}
}

// A unified sink that implements all domain-specific traits
pub trait MetricsSink:
    NetworkMetricsSink + LedgerMetricsSink + ReconcileMetricsSink + ErrorMetricsSink
{
}

// Blanket implementation
impl<T> MetricsSink for T where
    T: NetworkMetricsSink + LedgerMetricsSink + ReconcileMetricsSink + ErrorMetricsSink
{
}

/// The sink used when no metrics backend is installed.
pub fn nop() -> &'static dyn MetricsSink {
    static SINK: NopSink = NopSink;
    &SINK
}
