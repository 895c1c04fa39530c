//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a download being queued
pub fn record_download_started(model_id: &str) {
    metrics::counter!("model_depot_downloads_started_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a completed download with its size and duration
pub fn record_download_completed(model_id: &str, bytes: u64, duration: Duration) {
    metrics::counter!("model_depot_downloads_completed_total",
        "model" => model_id.to_string()
    )
    .increment(1);
    metrics::counter!("model_depot_downloaded_bytes_total").increment(bytes);
    metrics::histogram!("model_depot_download_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_download_failed(model_id: &str) {
    metrics::counter!("model_depot_downloads_failed_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

pub fn record_download_cancelled(model_id: &str) {
    metrics::counter!("model_depot_downloads_cancelled_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a model landing in local storage
pub fn record_model_added(model_id: &str) {
    metrics::counter!("model_depot_models_added_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

pub fn record_model_deleted(model_id: &str) {
    metrics::counter!("model_depot_models_deleted_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a failed integrity check
pub fn record_integrity_failure(model_id: &str) {
    metrics::counter!("model_depot_integrity_failures_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Update the gauge of non-terminal downloads
pub fn update_active_downloads(count: usize) {
    metrics::gauge!("model_depot_active_downloads").set(count as f64);
}

/// Update the gauge of indexed local models
pub fn update_local_model_count(count: usize) {
    metrics::gauge!("model_depot_local_models").set(count as f64);
}
