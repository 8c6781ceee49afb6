//! In-memory job snapshot table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::types::JobSnapshot;
use crate::pipeline::{CancelFlag, Job, JobObserver, PipelineError, ResultDescriptor};

struct JobEntry {
    snapshot: JobSnapshot,
    cancel: CancelFlag,
}

impl JobEntry {
    /// Finished, with no workspace left on disk for a caller to release.
    fn is_forgettable(&self) -> bool {
        self.snapshot.job.state.is_terminal()
            && (self.snapshot.job.workspace.is_none() || self.snapshot.workspace_released)
    }
}

/// Bookkeeping for every job the supervisor knows about. Holds no
/// workspace data.
pub(crate) struct JobRegistry {
    jobs: RwLock<HashMap<String, JobEntry>>,
    max_tracked: usize,
}

impl JobRegistry {
    pub(crate) fn new(max_tracked: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_tracked,
        }
    }

    /// Adds a job, evicting the oldest forgettable entries once the table
    /// is over its cap.
    pub(crate) async fn insert(&self, snapshot: JobSnapshot, cancel: CancelFlag) {
        let id = snapshot.job.id.clone();
        let mut jobs = self.jobs.write().await;
        jobs.insert(id, JobEntry { snapshot, cancel });

        if jobs.len() <= self.max_tracked {
            return;
        }
        let mut evictable: Vec<(DateTime<Utc>, String)> = jobs
            .iter()
            .filter(|(_, entry)| entry.is_forgettable())
            .map(|(id, entry)| (entry.snapshot.job.created_at, id.clone()))
            .collect();
        evictable.sort();

        let excess = jobs.len() - self.max_tracked;
        for (_, id) in evictable.into_iter().take(excess) {
            jobs.remove(&id);
        }
        debug!(tracked = jobs.len(), "Evicted finished job snapshots");
    }

    pub(crate) async fn get(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs.read().await.get(id).map(|e| e.snapshot.clone())
    }

    pub(crate) async fn list(&self) -> Vec<JobSnapshot> {
        let mut all: Vec<JobSnapshot> = self
            .jobs
            .read()
            .await
            .values()
            .map(|e| e.snapshot.clone())
            .collect();
        all.sort_by(|a, b| {
            a.job
                .created_at
                .cmp(&b.job.created_at)
                .then_with(|| a.job.id.cmp(&b.job.id))
        });
        all
    }

    pub(crate) async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub(crate) async fn cancel_flag(&self, id: &str) -> Option<CancelFlag> {
        self.jobs.read().await.get(id).map(|e| e.cancel.clone())
    }

    /// Stores the terminal job state with its result or error.
    pub(crate) async fn finish(&self, job: &Job, result: &Result<ResultDescriptor, PipelineError>) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job.id) {
            entry.snapshot.job = job.clone();
            match result {
                Ok(descriptor) => entry.snapshot.result = Some(descriptor.clone()),
                Err(e) => entry.snapshot.error = Some(e.user_message()),
            }
        }
    }

    /// Marks a job whose task died without reporting back.
    pub(crate) async fn abort(&self, id: &str, error: &PipelineError) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(id) {
            if !entry.snapshot.job.state.is_terminal() {
                entry.snapshot.job.fail(error);
                entry.snapshot.error = Some(error.user_message());
            }
        }
    }

    pub(crate) async fn mark_released(&self, id: &str) {
        if let Some(entry) = self.jobs.write().await.get_mut(id) {
            entry.snapshot.workspace_released = true;
        }
    }

    pub(crate) async fn remove(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs.write().await.remove(id).map(|e| e.snapshot)
    }
}

#[async_trait]
impl JobObserver for JobRegistry {
    async fn job_updated(&self, job: &Job) {
        if let Some(entry) = self.jobs.write().await.get_mut(&job.id) {
            entry.snapshot.job = job.clone();
        }
    }
}
