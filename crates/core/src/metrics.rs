//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Stage execution (invocations and durations per tool)
//! - Jobs (outcomes per kind, skipped transcodes, validation rejections)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Stage Metrics
// =============================================================================

/// Stage invocations total by tool and outcome.
pub static STAGE_INVOCATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stemdeck_stage_invocations_total",
            "Total external tool invocations",
        ),
        &["tool", "outcome"], // outcome: "succeeded", "tool_error", "timeout", "missing_output"
    )
    .unwrap()
});

/// Stage duration in seconds by tool.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "stemdeck_stage_duration_seconds",
            "Duration of external tool invocations",
        )
        .buckets(vec![
            0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0,
        ]),
        &["tool"],
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs finished total by kind and outcome.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stemdeck_jobs_finished_total", "Total jobs finished"),
        &["kind", "outcome"], // outcome: "succeeded" or a failure kind
    )
    .unwrap()
});

/// Transcodes skipped because the fetched file was already in the target format.
pub static TRANSCODES_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "stemdeck_transcodes_skipped_total",
        "Total transcode stages skipped",
    )
    .unwrap()
});

/// Requests rejected before any tool ran, by reason.
pub static VALIDATION_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stemdeck_validation_rejections_total",
            "Total job requests rejected by validation",
        ),
        &["reason"], // "unsupported_format", "invalid_parameter", "invalid_url", "empty_input"
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Stages
        Box::new(STAGE_INVOCATIONS.clone()),
        Box::new(STAGE_DURATION.clone()),
        // Jobs
        Box::new(JOBS_FINISHED.clone()),
        Box::new(TRANSCODES_SKIPPED.clone()),
        Box::new(VALIDATION_REJECTIONS.clone()),
    ]
}
