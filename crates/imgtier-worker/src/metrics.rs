//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const TASKS_COMPLETED_TOTAL: &str = "imgtier_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "imgtier_tasks_failed_total";
    pub const TASKS_DISCARDED_TOTAL: &str = "imgtier_tasks_discarded_total";
    pub const TASK_DURATION_SECONDS: &str = "imgtier_task_duration_seconds";
    pub const VARIANT_BYTES: &str = "imgtier_variant_bytes";
}

/// Install the recorder and serve `/metrics` on `port`.
///
/// Without a port, metric calls are no-ops.
pub fn init_metrics(port: Option<u16>) -> WorkerResult<()> {
    let Some(port) = port else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
        .map_err(|e| WorkerError::Metrics(e.to_string()))
}

pub fn record_task_completed(duration_secs: f64) {
    counter!(names::TASKS_COMPLETED_TOTAL).increment(1);
    histogram!(names::TASK_DURATION_SECONDS).record(duration_secs);
}

pub fn record_task_failed(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::TASKS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_task_discarded() {
    counter!(names::TASKS_DISCARDED_TOTAL).increment(1);
}

pub fn record_variant_bytes(quality: &str, bytes: usize) {
    let labels = [("quality", quality.to_string())];
    histogram!(names::VARIANT_BYTES, &labels).record(bytes as f64);
}
