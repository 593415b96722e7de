//! Prometheus metrics for ledger-sync-service.
//!
//! Domain metrics live in the default `prometheus` registry. HTTP metrics from
//! the shared middleware go through the `metrics` facade into an installed
//! Prometheus recorder; `/metrics` renders both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

/// Recorder behind the `metrics` facade, installed once per process.
static HTTP_RECORDER: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

fn http_recorder() -> Option<&'static PrometheusHandle> {
    HTTP_RECORDER
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install metrics recorder, HTTP metrics disabled");
                None
            }
        })
        .as_ref()
}

/// Counter for completed passes by outcome.
pub static SYNC_PASSES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_passes_total",
        "Total number of sync passes",
        &["outcome"]
    )
    .expect("Failed to register SYNC_PASSES")
});

/// Counter for per-record document results.
pub static DOCUMENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_documents_total",
        "Total number of per-record document results",
        &["kind", "result"]
    )
    .expect("Failed to register DOCUMENTS")
});

/// Counter for accounting API requests by operation and status.
pub static REMOTE_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_remote_requests_total",
        "Total number of accounting API requests",
        &["operation", "status"]
    )
    .expect("Failed to register REMOTE_REQUESTS")
});

/// Histogram for accounting API request duration.
pub static REMOTE_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_sync_remote_request_duration_seconds",
        "Accounting API request duration in seconds",
        &["operation"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register REMOTE_REQUEST_DURATION")
});

/// Counter for entity resolutions by kind and result.
pub static ENTITY_RESOLUTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_entity_resolutions_total",
        "Total number of entity resolutions",
        &["kind", "result"]
    )
    .expect("Failed to register ENTITY_RESOLUTIONS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_sync_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SYNC_PASSES);
    Lazy::force(&DOCUMENTS);
    Lazy::force(&REMOTE_REQUESTS);
    Lazy::force(&REMOTE_REQUEST_DURATION);
    Lazy::force(&ENTITY_RESOLUTIONS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ERRORS);
    http_recorder();
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    let mut text = String::from_utf8(buffer).unwrap_or_default();
    if let Some(handle) = HTTP_RECORDER.get().and_then(Option::as_ref) {
        text.push_str(&handle.render());
    }
    text
}

pub fn record_pass(outcome: &str) {
    SYNC_PASSES.with_label_values(&[outcome]).inc();
}

pub fn record_document(kind: &str, result: &str) {
    DOCUMENTS.with_label_values(&[kind, result]).inc();
}

pub fn record_remote_request(operation: &str, status: &str) {
    REMOTE_REQUESTS.with_label_values(&[operation, status]).inc();
}

pub fn observe_remote_duration(operation: &str, duration_secs: f64) {
    REMOTE_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

pub fn record_entity_resolution(kind: &str, result: &str) {
    ENTITY_RESOLUTIONS.with_label_values(&[kind, result]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
