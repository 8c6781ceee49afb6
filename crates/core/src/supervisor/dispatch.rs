//! Job dispatch onto independent tasks.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{RetentionPolicy, SupervisorConfig};
use super::registry::JobRegistry;
use super::types::{DiscardOutcome, JobSnapshot, SupervisorStatus};
use crate::pipeline::{
    CancelFlag, Job, JobRequest, PipelineCoordinator, PipelineError, ResultDescriptor,
};
use crate::workspace::{WorkspaceHandle, WorkspaceManager};

/// Job counters.
#[derive(Default)]
struct JobStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_succeeded: AtomicU64,
    total_failed: AtomicU64,
}

impl JobStats {
    fn record(&self, succeeded: bool) {
        if succeeded {
            self.total_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Handle to a submitted job.
///
/// Dropping the handle does not stop the job; it keeps running and its
/// outcome stays available through [`JobSupervisor::get`] until the
/// snapshot expires.
pub struct JobHandle {
    id: String,
    cancel: CancelFlag,
    task: JoinHandle<Result<ResultDescriptor, PipelineError>>,
    registry: Arc<JobRegistry>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Requests cancellation. Takes effect before the job's next stage.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the job to reach a terminal state.
    pub async fn wait(self) -> Result<ResultDescriptor, PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                let reason = if e.is_panic() {
                    "job task panicked".to_string()
                } else {
                    "job task was cancelled".to_string()
                };
                warn!(job_id = %self.id, reason = %reason, "Job task ended abnormally");
                let err = PipelineError::Aborted { reason };
                self.registry.abort(&self.id, &err).await;
                Err(err)
            }
        }
    }
}

/// Runs each job on its own task and keeps snapshots of all of them.
pub struct JobSupervisor {
    coordinator: Arc<PipelineCoordinator>,
    config: SupervisorConfig,
    semaphore: Option<Arc<Semaphore>>,
    registry: Arc<JobRegistry>,
    stats: Arc<JobStats>,
}

impl JobSupervisor {
    pub fn new(coordinator: Arc<PipelineCoordinator>, config: SupervisorConfig) -> Self {
        let semaphore = config
            .max_concurrent_jobs
            .map(|max| Arc::new(Semaphore::new(max)));
        let registry = Arc::new(JobRegistry::new(config.max_tracked_jobs));
        Self {
            coordinator,
            config,
            semaphore,
            registry,
            stats: Arc::new(JobStats::default()),
        }
    }

    pub fn coordinator(&self) -> &Arc<PipelineCoordinator> {
        &self.coordinator
    }

    /// Validates the request and starts the job in the background.
    ///
    /// Validation failures return immediately, before any workspace is
    /// allocated, and are kept as failed snapshots until the retention
    /// window passes or the snapshot cap pushes them out.
    pub async fn submit(&self, request: JobRequest) -> Result<JobHandle, PipelineError> {
        let mut job = Job::new(request.kind(), request.describe_input());
        let cancel = CancelFlag::new();

        let plan = match self.coordinator.begin(&mut job, request) {
            Ok(plan) => plan,
            Err(e) => {
                self.stats.record(false);
                let mut snapshot = JobSnapshot::new(job);
                snapshot.error = Some(e.user_message());
                let id = snapshot.job.id.clone();
                self.registry.insert(snapshot, cancel).await;
                if let RetentionPolicy::ReleaseAfter(after) = self.config.retention {
                    schedule_expiry(
                        Arc::clone(self.coordinator.workspaces()),
                        Arc::clone(&self.registry),
                        id,
                        None,
                        after,
                    );
                }
                return Err(e);
            }
        };

        let id = job.id.clone();
        self.registry
            .insert(JobSnapshot::new(job.clone()), cancel.clone())
            .await;
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        debug!(job_id = %id, kind = %job.kind, "Job submitted");

        let coordinator = Arc::clone(&self.coordinator);
        let semaphore = self.semaphore.clone();
        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        let retention = self.config.retention;
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            // Held until the job is done.
            let _permit = match semaphore {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        stats.queued.fetch_sub(1, Ordering::Relaxed);
                        stats.record(false);
                        let err = PipelineError::Aborted {
                            reason: "job queue closed".to_string(),
                        };
                        registry.abort(&job.id, &err).await;
                        return Err(err);
                    }
                },
                None => None,
            };
            stats.queued.fetch_sub(1, Ordering::Relaxed);
            stats.active.fetch_add(1, Ordering::Relaxed);

            // A panic still settles the counters and the snapshot.
            let outcome = AssertUnwindSafe(coordinator.execute(
                &mut job,
                plan,
                &task_cancel,
                registry.as_ref(),
            ))
            .catch_unwind()
            .await;

            stats.active.fetch_sub(1, Ordering::Relaxed);
            let result = match outcome {
                Ok(result) => {
                    registry.finish(&job, &result).await;
                    result
                }
                Err(_) => {
                    warn!(job_id = %job.id, "Job task panicked");
                    let err = PipelineError::Aborted {
                        reason: "job task panicked".to_string(),
                    };
                    registry.abort(&job.id, &err).await;
                    Err(err)
                }
            };
            stats.record(result.is_ok());

            if let RetentionPolicy::ReleaseAfter(after) = retention {
                schedule_expiry(
                    Arc::clone(coordinator.workspaces()),
                    Arc::clone(&registry),
                    job.id.clone(),
                    job.workspace.clone(),
                    after,
                );
            }

            result
        });

        Ok(JobHandle {
            id,
            cancel,
            task,
            registry: Arc::clone(&self.registry),
        })
    }

    pub async fn get(&self, id: &str) -> Option<JobSnapshot> {
        self.registry.get(id).await
    }

    /// All known jobs, oldest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        self.registry.list().await
    }

    /// Requests cancellation of a job. Returns false if the job is unknown
    /// or already finished.
    pub async fn cancel(&self, id: &str) -> bool {
        let Some(snapshot) = self.registry.get(id).await else {
            return false;
        };
        if snapshot.job.state.is_terminal() {
            return false;
        }
        match self.registry.cancel_flag(id).await {
            Some(flag) => {
                flag.cancel();
                info!(job_id = %id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancels a running job, or releases a finished job's workspace and
    /// forgets it. `None` if the job is unknown.
    pub async fn discard(&self, id: &str) -> Result<Option<DiscardOutcome>, PipelineError> {
        let Some(snapshot) = self.registry.get(id).await else {
            return Ok(None);
        };

        if !snapshot.job.state.is_terminal() {
            self.cancel(id).await;
            return Ok(Some(DiscardOutcome::CancelRequested));
        }

        if let Some(path) = &snapshot.job.workspace {
            let workspaces = self.coordinator.workspaces();
            workspaces.release(&handle_for(path)).await?;
        }
        self.registry.remove(id).await;
        info!(job_id = %id, "Job discarded");
        Ok(Some(DiscardOutcome::Released))
    }

    pub async fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            active_jobs: self.stats.active.load(Ordering::Relaxed) as usize,
            queued_jobs: self.stats.queued.load(Ordering::Relaxed) as usize,
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            total_succeeded: self.stats.total_succeeded.load(Ordering::Relaxed),
            total_failed: self.stats.total_failed.load(Ordering::Relaxed),
            tracked_jobs: self.registry.len().await,
        }
    }
}

fn handle_for(path: &Path) -> WorkspaceHandle {
    let id = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    WorkspaceHandle::new(id, path.to_path_buf())
}

/// Releases a finished job's workspace after `after`, then forgets the job
/// one window later. A job without a workspace is forgotten after `after`.
fn schedule_expiry(
    workspaces: Arc<WorkspaceManager>,
    registry: Arc<JobRegistry>,
    job_id: String,
    workspace: Option<PathBuf>,
    after: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(path) = workspace {
            match workspaces.release(&handle_for(&path)).await {
                Ok(()) => {
                    debug!(job_id = %job_id, "Workspace released after retention window");
                    registry.mark_released(&job_id).await;
                }
                Err(e) => {
                    // Keep the snapshot so a later discard can retry the release.
                    warn!(job_id = %job_id, error = %e, "Failed to release workspace");
                    return;
                }
            }
            tokio::time::sleep(after).await;
        }
        if registry.remove(&job_id).await.is_some() {
            debug!(job_id = %job_id, "Job snapshot expired");
        }
    });
}
