use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Encoder, Histogram, TextEncoder,
};

use crate::models::outcome::ProvisioningOutcome;

lazy_static! {
    pub static ref PROVISIONING_COUNTER: CounterVec = register_counter_vec!(
        "tenant_provisioning_total",
        "Provisioning attempts by result and failure stage",
        &["result", "stage"]
    ).unwrap();

    pub static ref ROLLBACK_COUNTER: CounterVec = register_counter_vec!(
        "tenant_provisioning_rollbacks_total",
        "Compensating drops by result",
        &["result"]
    ).unwrap();

    pub static ref VALIDATION_REJECTIONS: CounterVec = register_counter_vec!(
        "tenant_provisioning_rejected_total",
        "Tenant events rejected before any side effect",
        &["reason"]
    ).unwrap();

    pub static ref PROVISIONING_DURATION: Histogram = register_histogram!(
        "tenant_provisioning_duration_seconds",
        "Wall time of a provisioning attempt"
    ).unwrap();
}

pub fn record_outcome(outcome: &ProvisioningOutcome) {
    let result = if outcome.succeeded { "success" } else { "failure" };
    PROVISIONING_COUNTER
        .with_label_values(&[result, outcome.failure_stage.as_str()])
        .inc();
    PROVISIONING_DURATION.observe(outcome.duration_secs());
}

pub fn record_rollback(ok: bool) {
    ROLLBACK_COUNTER
        .with_label_values(&[if ok { "ok" } else { "failed" }])
        .inc();
}

pub fn record_rejection(reason: &str) {
    VALIDATION_REJECTIONS.with_label_values(&[reason]).inc();
}

/// Prometheus text exposition of every registered metric.
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
