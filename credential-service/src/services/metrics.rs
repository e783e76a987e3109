//! Prometheus export and credential operation counters.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use super::ServiceError;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder.
///
/// Safe to call more than once: later calls keep the first recorder.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    if METRICS_HANDLE.set(handle).is_err() {
        tracing::warn!("Metrics recorder already initialized");
    }
    Ok(())
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

/// Count one credential operation by outcome, passing the result through.
pub fn track<T>(
    operation: &'static str,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    metrics::counter!(
        "credential_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    result
}

pub fn record_purged(kind: &'static str, count: u64) {
    if count > 0 {
        metrics::counter!("expired_tokens_purged_total", "kind" => kind).increment(count);
    }
}
