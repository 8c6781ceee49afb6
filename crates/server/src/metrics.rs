//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the stemdeck server:
//! - HTTP request metrics (latency, counts)
//! - Supervisor load (collected dynamically)
//! - Stage and job metrics registered from the core crate

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

static UUID_SEGMENT: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap()
});

static NUMERIC_SEGMENT: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "stemdeck_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        // Synchronous job requests can hold the connection for the whole run.
        .buckets(vec![
            0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0, 1800.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stemdeck_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "stemdeck_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Supervisor Metrics (collected dynamically)
// =============================================================================

/// Jobs currently executing stages.
pub static JOBS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("stemdeck_jobs_active", "Number of jobs currently running").unwrap()
});

/// Jobs waiting for a concurrency slot.
pub static JOBS_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "stemdeck_jobs_queued",
        "Number of jobs waiting for a concurrency slot",
    )
    .unwrap()
});

/// Jobs held in the snapshot table.
pub static JOBS_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "stemdeck_jobs_tracked",
        "Number of job snapshots currently held",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Supervisor
    registry.register(Box::new(JOBS_ACTIVE.clone())).unwrap();
    registry.register(Box::new(JOBS_QUEUED.clone())).unwrap();
    registry.register(Box::new(JOBS_TRACKED.clone())).unwrap();

    // Core metrics (stages, jobs, validation)
    for metric in stemdeck_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the supervisor gauges reflect current load.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.supervisor().status().await;
    JOBS_ACTIVE.set(status.active_jobs as i64);
    JOBS_QUEUED.set(status.queued_jobs as i64);
    JOBS_TRACKED.set(status.tracked_jobs as i64);
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}
