//! Stage sequencing for a single job.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use super::error::{PipelineError, ValidationError, PARTIAL_OUTPUT_NOTE};
use super::types::{
    AudioFormat, Job, JobPlan, JobRequest, JobState, ResultDescriptor, ResultKind, StageRecord,
    StemCount, TranscodeTarget, UploadedFile, MAX_BITRATE_KBPS, MIN_BITRATE_KBPS,
};
use crate::config::{PipelineConfig, ToolsConfig};
use crate::metrics;
use crate::stage::{empty_files, list_files, StageExecutor, StageFailure, StageInvocation, StageResult};
use crate::tools::{ToolCommands, FETCH_DIR, STEMS_DIR};
use crate::workspace::{WorkspaceHandle, WorkspaceManager};

/// Workspace subdirectory holding an uploaded input.
const INPUT_DIR: &str = "input";

/// Cooperative cancellation flag, checked before each stage.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives a job snapshot after every state change.
#[async_trait]
pub trait JobObserver: Send + Sync {
    async fn job_updated(&self, job: &Job);
}

/// Observer that ignores updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl JobObserver for NoopObserver {
    async fn job_updated(&self, _job: &Job) {}
}

/// Turns one validated request into a sequence of stages.
pub struct PipelineCoordinator {
    config: PipelineConfig,
    tools: ToolCommands,
    workspaces: Arc<WorkspaceManager>,
    executor: Arc<dyn StageExecutor>,
}

impl PipelineCoordinator {
    pub fn new(
        config: PipelineConfig,
        tools: ToolsConfig,
        workspaces: Arc<WorkspaceManager>,
        executor: Arc<dyn StageExecutor>,
    ) -> Self {
        Self {
            config,
            tools: ToolCommands::new(tools),
            workspaces,
            executor,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// Checks a request without touching the filesystem or any tool.
    pub fn validate(&self, request: JobRequest) -> Result<JobPlan, ValidationError> {
        match request {
            JobRequest::FetchAndTranscode {
                url,
                format,
                bitrate_kbps,
            } => {
                let url = parse_fetch_url(&url)?;
                let format = match format.as_deref() {
                    None => self.config.target_format,
                    Some(name) => AudioFormat::parse(name).ok_or_else(|| {
                        ValidationError::UnsupportedFormat {
                            extension: name.to_string(),
                            allowed: AudioFormat::ALL
                                .iter()
                                .map(|f| f.extension().to_string())
                                .collect(),
                        }
                    })?,
                };
                let bitrate_kbps = bitrate_kbps.unwrap_or(self.config.bitrate_kbps);
                if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&bitrate_kbps) {
                    return Err(ValidationError::InvalidParameter {
                        name: "bitrate_kbps",
                        value: bitrate_kbps.to_string(),
                        reason: format!(
                            "must be between {} and {}",
                            MIN_BITRATE_KBPS, MAX_BITRATE_KBPS
                        ),
                    });
                }
                Ok(JobPlan::FetchAndTranscode {
                    url,
                    target: TranscodeTarget {
                        format,
                        bitrate_kbps,
                    },
                })
            }
            JobRequest::SeparateStems { input, stems } => {
                let stems = StemCount::try_from(stems)?;
                let UploadedFile { file_name, data } = input;
                let input_name = sanitize_file_name(&file_name)?;

                let extension = Path::new(&input_name)
                    .extension()
                    .map(|e| e.to_string_lossy().to_ascii_lowercase())
                    .unwrap_or_default();
                let allowed = &self.config.allowed_input_extensions;
                if !allowed.iter().any(|a| a.eq_ignore_ascii_case(&extension)) {
                    return Err(ValidationError::UnsupportedFormat {
                        extension,
                        allowed: allowed.clone(),
                    });
                }

                if data.is_empty() {
                    return Err(ValidationError::EmptyInput {
                        reason: format!("'{}' has no content", input_name),
                    });
                }

                Ok(JobPlan::SeparateStems {
                    input_name,
                    data,
                    stems,
                })
            }
        }
    }

    /// Moves a fresh job through validation.
    ///
    /// On rejection the job ends in `Failed` and no workspace is allocated.
    pub fn begin(&self, job: &mut Job, request: JobRequest) -> Result<JobPlan, PipelineError> {
        job.transition(JobState::Validating);
        match self.validate(request) {
            Ok(plan) => Ok(plan),
            Err(e) => {
                info!(job_id = %job.id, kind = %job.kind, reason = e.reason(), error = %e, "Job rejected");
                metrics::VALIDATION_REJECTIONS
                    .with_label_values(&[e.reason()])
                    .inc();
                let err = PipelineError::Validation(e);
                job.fail(&err);
                record_finished(job, Some(&err));
                Err(err)
            }
        }
    }

    /// Runs a validated job to a terminal state.
    pub async fn execute(
        &self,
        job: &mut Job,
        plan: JobPlan,
        cancel: &CancelFlag,
        observer: &dyn JobObserver,
    ) -> Result<ResultDescriptor, PipelineError> {
        let span = info_span!("job", job_id = %job.id, kind = %job.kind);
        async {
            let outcome = self.execute_plan(job, plan, cancel, observer).await;
            match &outcome {
                Ok(result) => {
                    job.transition(JobState::Succeeded);
                    info!(files = result.files.len(), "Job succeeded");
                }
                Err(PipelineError::Cancelled) => {
                    job.fail(&PipelineError::Cancelled);
                    info!("Job cancelled");
                }
                Err(e) => {
                    job.fail(e);
                    warn!(kind = e.kind().as_str(), error = %e, "Job failed");
                }
            }
            record_finished(job, outcome.as_ref().err());
            observer.job_updated(job).await;
            outcome.map(|mut result| {
                result.stages = job.stages.clone();
                result
            })
        }
        .instrument(span)
        .await
    }

    /// Creates, validates and executes a job without supervision.
    pub async fn run(&self, request: JobRequest) -> (Job, Result<ResultDescriptor, PipelineError>) {
        let mut job = Job::new(request.kind(), request.describe_input());
        let result = match self.begin(&mut job, request) {
            Ok(plan) => {
                self.execute(&mut job, plan, &CancelFlag::new(), &NoopObserver)
                    .await
            }
            Err(e) => Err(e),
        };
        (job, result)
    }

    async fn execute_plan(
        &self,
        job: &mut Job,
        plan: JobPlan,
        cancel: &CancelFlag,
        observer: &dyn JobObserver,
    ) -> Result<ResultDescriptor, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let workspace = self.workspaces.acquire(job.kind).await?;
        job.workspace = Some(workspace.path().to_path_buf());
        debug!(workspace = %workspace.path().display(), "Workspace assigned");
        observer.job_updated(job).await;

        match plan {
            JobPlan::FetchAndTranscode { url, target } => {
                self.fetch_and_transcode(job, &workspace, &url, target, cancel, observer)
                    .await
            }
            JobPlan::SeparateStems {
                input_name,
                data,
                stems,
            } => {
                self.separate_stems(job, &workspace, &input_name, &data, stems, cancel, observer)
                    .await
            }
        }
    }

    async fn fetch_and_transcode(
        &self,
        job: &mut Job,
        workspace: &WorkspaceHandle,
        url: &Url,
        target: TranscodeTarget,
        cancel: &CancelFlag,
        observer: &dyn JobObserver,
    ) -> Result<ResultDescriptor, PipelineError> {
        let fetch = self.tools.fetch(
            url,
            workspace.path(),
            Duration::from_secs(self.config.fetch_timeout_secs),
        );
        let expected = fetch.expected_output.describe();
        let fetch_dir = workspace.path().join(FETCH_DIR);
        let fetched = match self.run_stage(job, fetch, cancel, observer).await {
            Ok(result) => result,
            Err(err) => return Err(attach_partial_outputs(job, err, &fetch_dir, &[]).await),
        };

        let Some(source) = largest_file(fetched.outputs()).await else {
            let err = PipelineError::MissingOutput {
                tool: fetched.tool,
                expected,
                partial_files: vec![],
            };
            return Err(attach_partial_outputs(job, err, &fetch_dir, &[]).await);
        };

        let label = target.format.label();
        let already_target = source
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(target.format.extension()));

        if already_target {
            metrics::TRANSCODES_SKIPPED.inc();
            info!(file = %source.display(), format = %label, "Fetched file already in target format, skipping transcode");
            return Ok(self.describe(
                job,
                workspace,
                ResultKind::AudioTrack,
                vec![source],
                format!("File is already in {} format.", label),
            ));
        }

        let transcode = self.tools.transcode(
            &source,
            workspace.path(),
            &target,
            Duration::from_secs(self.config.transcode_timeout_secs),
        );
        let expected = transcode.expected_output.describe();
        // The transcoder writes into the workspace root, next to other stages' dirs.
        let other_stages = [
            workspace.path().join(FETCH_DIR),
            workspace.path().join(INPUT_DIR),
        ];
        let transcoded = match self.run_stage(job, transcode, cancel, observer).await {
            Ok(result) => result,
            Err(err) => {
                return Err(
                    attach_partial_outputs(job, err, workspace.path(), &other_stages).await,
                )
            }
        };
        let Some(output) = transcoded.outputs().first().cloned() else {
            let err = PipelineError::MissingOutput {
                tool: transcoded.tool,
                expected,
                partial_files: vec![],
            };
            return Err(attach_partial_outputs(job, err, workspace.path(), &other_stages).await);
        };

        let message = format!(
            "Download and conversion completed! Saved as {}: {}",
            label,
            output.display()
        );
        Ok(self.describe(job, workspace, ResultKind::AudioTrack, vec![output], message))
    }

    #[allow(clippy::too_many_arguments)]
    async fn separate_stems(
        &self,
        job: &mut Job,
        workspace: &WorkspaceHandle,
        input_name: &str,
        data: &[u8],
        stems: StemCount,
        cancel: &CancelFlag,
        observer: &dyn JobObserver,
    ) -> Result<ResultDescriptor, PipelineError> {
        let input = workspace
            .write_file(&format!("{}/{}", INPUT_DIR, input_name), data)
            .await?;
        let stems_dir = workspace.create_subdir(STEMS_DIR).await?;
        debug!(input = %input.display(), bytes = data.len(), "Input staged");

        let separate = self.tools.separate(
            &input,
            workspace.path(),
            stems,
            Duration::from_secs(self.config.separate_timeout_secs),
        );

        match self.run_stage(job, separate, cancel, observer).await {
            Ok(result) => {
                let mut message = format!(
                    "Audio processing complete! Files saved in: {}",
                    stems_dir.display()
                );
                let empty = empty_files(&stems_dir).await;
                if !empty.is_empty() {
                    warn!(count = empty.len(), "Separator wrote empty stems, leaving them out");
                    let listed: Vec<String> = empty.iter().map(|p| p.display().to_string()).collect();
                    message.push_str(&format!(" Skipped empty stems: {}", listed.join(", ")));
                    if let Some(record) = job.stages.last_mut() {
                        record.empty_outputs = empty;
                    }
                }
                Ok(self.describe(
                    job,
                    workspace,
                    ResultKind::StemSet,
                    result.outputs().to_vec(),
                    message,
                ))
            }
            Err(err) => Err(attach_partial_outputs(job, err, &stems_dir, &[]).await),
        }
    }

    /// Runs one stage and records it on the job.
    async fn run_stage(
        &self,
        job: &mut Job,
        invocation: StageInvocation,
        cancel: &CancelFlag,
        observer: &dyn JobObserver,
    ) -> Result<StageResult, PipelineError> {
        let tool = invocation.tool;
        if cancel.is_cancelled() {
            debug!(tool = %tool, "Cancelled before stage");
            return Err(PipelineError::Cancelled);
        }

        job.transition(JobState::Running { stage: tool });
        observer.job_updated(job).await;
        info!(tool = %tool, "Stage started");

        let result = self.executor.run(&invocation).await;

        metrics::STAGE_INVOCATIONS
            .with_label_values(&[tool.as_str(), result.outcome_label()])
            .inc();
        metrics::STAGE_DURATION
            .with_label_values(&[tool.as_str()])
            .observe(result.duration_ms as f64 / 1000.0);
        job.stages.push(StageRecord::new(&invocation, &result));

        let Some(failure) = result.failure() else {
            info!(
                tool = %tool,
                duration_ms = result.duration_ms,
                outputs = result.outputs().len(),
                "Stage succeeded"
            );
            return Ok(result);
        };

        warn!(
            tool = %tool,
            exit_code = ?result.exit_code,
            duration_ms = result.duration_ms,
            outcome = result.outcome_label(),
            "Stage failed"
        );

        Err(match failure {
            StageFailure::ToolError => PipelineError::ToolError {
                tool,
                exit_code: result.exit_code,
                diagnostic: result.diagnostic,
            },
            StageFailure::Timeout => PipelineError::Timeout {
                tool,
                timeout_secs: invocation.timeout.as_secs(),
            },
            StageFailure::MissingOutput => PipelineError::MissingOutput {
                tool,
                expected: invocation.expected_output.describe(),
                partial_files: vec![],
            },
        })
    }

    fn describe(
        &self,
        job: &Job,
        workspace: &WorkspaceHandle,
        kind: ResultKind,
        files: Vec<PathBuf>,
        message: String,
    ) -> ResultDescriptor {
        ResultDescriptor {
            job_id: job.id.clone(),
            kind,
            files,
            message,
            workspace: workspace.path().to_path_buf(),
            stages: Vec::new(),
        }
    }
}

fn record_finished(job: &Job, error: Option<&PipelineError>) {
    let outcome = error.map(|e| e.kind().as_str()).unwrap_or("succeeded");
    metrics::JOBS_FINISHED
        .with_label_values(&[job.kind.as_str(), outcome])
        .inc();
}

/// Accepts only absolute http(s) URLs with a host.
fn parse_fetch_url(raw: &str) -> Result<Url, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("URL is empty".to_string()));
    }

    let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("URL has no host".to_string()));
    }
    Ok(url)
}

/// Reduces a client-supplied name to its final path component.
fn sanitize_file_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(ValidationError::EmptyInput {
            reason: "uploaded file has no usable name".to_string(),
        });
    }
    Ok(name.to_string())
}

/// Picks the largest file; the fetcher may leave side files next to the media.
async fn largest_file(paths: &[PathBuf]) -> Option<PathBuf> {
    let mut best: Option<(u64, &PathBuf)> = None;
    for path in paths {
        let len = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        if best.map_or(true, |(size, _)| len > size) {
            best = Some((len, path));
        }
    }
    best.map(|(_, path)| path.clone())
}

/// Lists files a failed stage left in `dir` and attaches them to the error.
///
/// Anything under `exclude` belongs to an earlier stage and is not listed.
async fn attach_partial_outputs(
    job: &mut Job,
    err: PipelineError,
    dir: &Path,
    exclude: &[PathBuf],
) -> PipelineError {
    // Cancellation happens before the stage runs, so there is no record to amend.
    if matches!(err, PipelineError::Cancelled) {
        return err;
    }

    let partial: Vec<PathBuf> = list_files(dir)
        .await
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| !exclude.iter().any(|other| path.starts_with(other)))
        .collect();
    if partial.is_empty() {
        return err;
    }

    let tool = job.stages.last().map(|r| r.tool.as_str()).unwrap_or("unknown");
    warn!(tool, count = partial.len(), "Stage failed with partial output");
    if let Some(record) = job.stages.last_mut() {
        record.partial_outputs = partial.clone();
    }

    match err {
        PipelineError::ToolError {
            tool,
            exit_code,
            mut diagnostic,
        } => {
            let listed: Vec<String> = partial.iter().map(|p| p.display().to_string()).collect();
            if !diagnostic.is_empty() {
                diagnostic.push('\n');
            }
            diagnostic.push_str(PARTIAL_OUTPUT_NOTE);
            diagnostic.push_str(&listed.join(", "));
            PipelineError::ToolError {
                tool,
                exit_code,
                diagnostic,
            }
        }
        PipelineError::MissingOutput { tool, expected, .. } => PipelineError::MissingOutput {
            tool,
            expected,
            partial_files: partial,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch_url() {
        assert!(parse_fetch_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(parse_fetch_url("  http://example.com/a  ").is_ok());

        for bad in ["", "   ", "not a url", "ftp://example.com/a", "file:///etc/passwd", "-o/tmp/x"] {
            assert!(
                matches!(parse_fetch_url(bad), Err(ValidationError::InvalidUrl { .. })),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("song.wav").unwrap(), "song.wav");
        assert_eq!(sanitize_file_name("../../etc/song.wav").unwrap(), "song.wav");
        assert_eq!(sanitize_file_name("C:\\Music\\song.flac").unwrap(), "song.flac");
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("dir/").is_err());
        assert!(sanitize_file_name("..").is_err());
    }

    #[tokio::test]
    async fn test_largest_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let small = temp.path().join("a.json");
        let big = temp.path().join("b.webm");
        std::fs::write(&small, b"{}").unwrap();
        std::fs::write(&big, vec![0u8; 1024]).unwrap();

        let picked = largest_file(&[small, big.clone()]).await;
        assert_eq!(picked, Some(big));
        assert_eq!(largest_file(&[]).await, None);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
