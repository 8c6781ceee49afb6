pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod stage;
pub mod supervisor;
pub mod testing;
pub mod tools;
pub mod workspace;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, PipelineConfig,
    SanitizedConfig, ToolsConfig,
};
pub use pipeline::{
    AudioFormat, CancelFlag, FailureKind, Job, JobKind, JobObserver, JobRequest, JobState,
    JobStatus, PipelineCoordinator, PipelineError, ResultDescriptor, ResultKind, StemCount,
    UploadedFile, ValidationError,
};
pub use stage::{ProcessExecutor, StageExecutor, ToolKind};
pub use supervisor::{
    DiscardOutcome, JobHandle, JobSnapshot, JobSupervisor, RetentionPolicy, SupervisorConfig,
    SupervisorStatus,
};
pub use tools::{probe_tools, ToolProbe};
pub use workspace::{WorkspaceError, WorkspaceHandle, WorkspaceManager};
