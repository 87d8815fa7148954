//! Metrics implementation using Prometheus.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use warden_core::{Error, Result};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::config(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Helper to track usage updates accepted by the engine.
pub fn track_usage_update(policy: &str, kind: &'static str) {
    metrics::counter!(
        "warden_usage_updates_total",
        "policy" => policy.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Helper to track recorded infractions.
pub fn track_infraction(policy: &str, suspended: bool) {
    metrics::counter!(
        "warden_infractions_total",
        "policy" => policy.to_string(),
        "suspended" => suspended.to_string()
    )
    .increment(1);
}

pub fn track_escalation_failure() {
    metrics::counter!("warden_escalation_failures_total").increment(1);
}

/// Helper to track HTTP request metrics (latency, count).
pub fn track_request(method: &str, path: &str, status: u16, latency_sec: f64) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(latency_sec);
}
