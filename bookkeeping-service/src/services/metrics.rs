//! Metrics collection and Prometheus export.
//!
//! Domain counters are recorded at their call sites with the `metrics`
//! macros:
//! - `documents_created_total{class}`
//! - `returns_committed_total`, `returns_rejected_total{reason}`
//! - `lot_reservations_total{outcome}`
//! - `cascade_deletes_total{kind}`
//! - `partial_writes_total{operation}`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics recorder. Later calls are no-ops.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
    }
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(!get_metrics().starts_with("# Metrics recorder not initialized"));
    }
}
