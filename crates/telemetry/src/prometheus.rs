// Path: crates/telemetry/src/prometheus.rs
//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::*;
use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_counter, register_int_counter_vec, Encoder, Gauge, GaugeVec, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

// --- Metric Definitions ---

// GAUGE (no _total suffix)
static NETWORK_COMPLIANCE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "auditchain_network_compliance",
        "Compliance of the active network (1 for the current state, 0 otherwise).",
        &["state"]
    )
    .unwrap()
});
static RECONCILE_PENDING: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "auditchain_reconcile_pending",
        "Confirmed certifications the backend store does not reflect yet."
    )
    .unwrap()
});

// COUNTER (correctly uses _total suffix)
static NEGOTIATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auditchain_negotiations_total",
        "Network negotiation runs by result.",
        &["result"]
    )
    .unwrap()
});
static SWITCH_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auditchain_switch_attempts_total",
        "Per-candidate network switch attempts by result.",
        &["result"]
    )
    .unwrap()
});
static CERTIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auditchain_certifications_total",
        "Finished certification attempts by outcome.",
        &["outcome"]
    )
    .unwrap()
});
static RECONCILE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "auditchain_reconcile_failures_total",
        "Backend updates that failed after ledger confirmation."
    )
    .unwrap()
});
static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "auditchain_errors_total",
        "Errors surfaced by the controller by kind.",
        &["kind"]
    )
    .unwrap()
});

// HISTOGRAM (uses unit suffix like _seconds)
static STEP_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "auditchain_step_duration_seconds",
        "Latency of certification suspension points.",
        &["step"],
        exponential_buckets(0.005, 2.0, 16).unwrap()
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

impl NetworkMetricsSink for PrometheusSink {
    fn set_compliance(&self, state_name: &'static str) {
        for state in &["unknown", "compliant", "noncompliant"] {
            NETWORK_COMPLIANCE
                .with_label_values(&[state])
                .set(if *state == state_name { 1.0 } else { 0.0 });
        }
    }
    fn inc_negotiations(&self, result: &'static str) {
        NEGOTIATIONS_TOTAL.with_label_values(&[result]).inc();
    }
    fn inc_switch_attempts(&self, result: &'static str) {
        SWITCH_ATTEMPTS_TOTAL.with_label_values(&[result]).inc();
    }
}
impl LedgerMetricsSink for PrometheusSink {
    fn inc_certifications(&self, outcome: &'static str) {
        CERTIFICATIONS_TOTAL.with_label_values(&[outcome]).inc();
    }
    fn observe_step_duration(&self, step: &'static str, duration_secs: f64) {
        STEP_DURATION_SECONDS
            .with_label_values(&[step])
            .observe(duration_secs);
    }
}
impl ReconcileMetricsSink for PrometheusSink {
    fn inc_reconcile_failures(&self) {
        RECONCILE_FAILURES_TOTAL.inc();
    }
    fn set_pending_reconciliations(&self, count: usize) {
        RECONCILE_PENDING.set(count as f64);
    }
}
impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str) {
        ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }
}

pub fn install() -> &'static dyn MetricsSink {
    static SINK: PrometheusSink = PrometheusSink;
    &SINK
}

/// Renders every registered metric in the Prometheus text exposition format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
