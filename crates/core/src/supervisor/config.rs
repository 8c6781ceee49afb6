//! Configuration for the supervisor module.

use std::time::Duration;

use crate::config::Config;

/// Finished jobs kept when nothing else bounds the table.
pub const DEFAULT_MAX_TRACKED_JOBS: usize = 1000;

/// What happens to a finished job's workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// Leave it; the caller owns cleanup.
    #[default]
    Keep,
    /// Release it once this much time has passed since the job finished,
    /// then forget the job one window later.
    ReleaseAfter(Duration),
}

/// Configuration for the job supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum jobs running at once. `None` means unbounded.
    pub max_concurrent_jobs: Option<usize>,
    pub retention: RetentionPolicy,
    /// Cap on finished snapshots that have no workspace left to clean up.
    /// Jobs whose workspace is still on disk are never evicted.
    pub max_tracked_jobs: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: None,
            retention: RetentionPolicy::default(),
            max_tracked_jobs: DEFAULT_MAX_TRACKED_JOBS,
        }
    }
}

impl SupervisorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_jobs: config.pipeline.max_concurrent_jobs,
            retention: config
                .workspace
                .retention_secs
                .map(|secs| RetentionPolicy::ReleaseAfter(Duration::from_secs(secs)))
                .unwrap_or_default(),
            max_tracked_jobs: config.pipeline.max_tracked_jobs,
        }
    }
}
