/// Prometheus metrics for matching-service
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, CounterVec, Encoder, IntCounter, TextEncoder,
};

lazy_static! {
    /// Gift actions by kind (like|spark|spark_withdraw|echo_offer|echo_return|echo_decline)
    /// and business outcome
    pub static ref GIFT_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "matching_gift_outcomes_total",
        "Total gift actions by kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap();

    /// Conversation gate decisions (labels: decision=allow|deny, reason)
    pub static ref GATE_DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "matching_gate_decisions_total",
        "Total conversation gate decisions",
        &["decision", "reason"]
    )
    .unwrap();

    /// Discovery requests by the tier that produced the result (or "empty")
    pub static ref DISCOVERY_RESULTS_TOTAL: CounterVec = register_counter_vec!(
        "matching_discovery_results_total",
        "Total discovery requests by resolving tier",
        &["tier"]
    )
    .unwrap();

    /// Broken invariants observed at runtime. Should stay at zero.
    pub static ref INTEGRITY_VIOLATIONS_TOTAL: IntCounter = register_int_counter!(
        "matching_integrity_violations_total",
        "Total integrity violations detected"
    )
    .unwrap();
}

pub fn record_gift(kind: &str, outcome: &str) {
    GIFT_OUTCOMES_TOTAL.with_label_values(&[kind, outcome]).inc();
}

/// Render the default registry in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
