//! Types for the supervisor module.

use serde::Serialize;

use crate::pipeline::{Job, ResultDescriptor};

/// Point-in-time view of a supervised job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultDescriptor>,
    /// User-facing failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the job's workspace has been removed.
    pub workspace_released: bool,
}

impl JobSnapshot {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            result: None,
            error: None,
            workspace_released: false,
        }
    }
}

/// Supervisor counters.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    /// Jobs currently executing stages.
    pub active_jobs: usize,
    /// Jobs waiting for a concurrency slot.
    pub queued_jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<usize>,
    pub total_succeeded: u64,
    /// Includes rejected and cancelled jobs.
    pub total_failed: u64,
    /// Jobs currently held in the snapshot table.
    pub tracked_jobs: usize,
}

/// Result of discarding a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardOutcome {
    /// The job was still running and has been asked to stop.
    CancelRequested,
    /// The job was finished; its workspace was released and it was forgotten.
    Released,
}
