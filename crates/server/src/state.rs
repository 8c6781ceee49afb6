use std::sync::Arc;
use stemdeck_core::{Config, JobSupervisor, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    supervisor: Arc<JobSupervisor>,
}

impl AppState {
    pub fn new(config: Config, supervisor: Arc<JobSupervisor>) -> Self {
        Self { config, supervisor }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn supervisor(&self) -> &JobSupervisor {
        self.supervisor.as_ref()
    }
}
