//! Pipeline lifecycle integration tests.
//!
//! These tests drive the coordinator with the mock stage executor:
//! - Stage sequencing and the skip-transcode decision
//! - Validation before any filesystem or tool work
//! - Failure classification at each stage boundary
//! - Job state transitions and stage records

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use stemdeck_core::{
    config::{PipelineConfig, ToolsConfig},
    pipeline::{CancelFlag, NoopObserver},
    testing::{fixtures, MockBehavior, MockStageExecutor},
    FailureKind, Job, JobRequest, JobState, JobStatus, PipelineCoordinator, PipelineError,
    ResultKind, ToolKind, ValidationError, WorkspaceManager,
};

const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Test helper wiring a coordinator to a mock executor.
struct TestHarness {
    coordinator: PipelineCoordinator,
    executor: MockStageExecutor,
    temp_dir: TempDir,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_config(PipelineConfig::default()).await
    }

    async fn with_config(config: PipelineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let workspaces = Arc::new(
            WorkspaceManager::new(temp_dir.path().join("jobs"))
                .await
                .expect("Failed to create workspace root"),
        );
        let executor = MockStageExecutor::new();
        let coordinator = PipelineCoordinator::new(
            config,
            ToolsConfig::default(),
            workspaces,
            Arc::new(executor.clone()),
        );

        Self {
            coordinator,
            executor,
            temp_dir,
        }
    }

    fn workspace_root(&self) -> std::path::PathBuf {
        self.coordinator.workspaces().root().to_path_buf()
    }

    fn workspace_count(&self) -> usize {
        std::fs::read_dir(self.workspace_root()).unwrap().count()
    }
}

fn workspace_of(job: &Job) -> &Path {
    job.workspace.as_deref().expect("job should have a workspace")
}

// =============================================================================
// Fetch and transcode
// =============================================================================

#[tokio::test]
async fn test_fetch_already_in_target_format_skips_transcode() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(ToolKind::Fetcher, MockBehavior::succeed_with(&["fetch/Song.mp3"]))
        .await;

    let (job, result) = harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await;
    let result = result.expect("job should succeed");

    assert_eq!(harness.executor.invocation_count().await, 1);
    assert!(harness
        .executor
        .invocations_for(ToolKind::Transcoder)
        .await
        .is_empty());
    assert_eq!(result.kind, ResultKind::AudioTrack);
    assert_eq!(result.files, vec![workspace_of(&job).join("fetch/Song.mp3")]);
    assert_eq!(result.message, "File is already in MP3 format.");
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.stages.len(), 1);
}

#[tokio::test]
async fn test_webm_fetch_is_transcoded_to_mp3() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(ToolKind::Fetcher, MockBehavior::succeed_with(&["fetch/Song.webm"]))
        .await;

    let (job, result) = harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await;
    let result = result.expect("job should succeed");
    let workspace = workspace_of(&job);

    let transcodes = harness.executor.invocations_for(ToolKind::Transcoder).await;
    assert_eq!(transcodes.len(), 1);
    let transcode = &transcodes[0];
    assert!(transcode.has_arg_pair("-c:a", "libmp3lame"));
    assert!(transcode.has_arg_pair("-b:a", "192k"));
    assert!(transcode.has_arg_pair("-i", &workspace.join("fetch/Song.webm").to_string_lossy()));
    assert_eq!(transcode.working_dir, workspace);

    assert_eq!(result.files, vec![workspace.join("Song.mp3")]);
    assert!(result.message.starts_with("Download and conversion completed! Saved as MP3:"));
    // The intermediate stays in the workspace.
    assert!(workspace.join("fetch/Song.webm").exists());

    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.stages[0].tool, ToolKind::Fetcher);
    assert_eq!(result.stages[1].tool, ToolKind::Transcoder);
    assert!(result.stages.iter().all(|s| s.succeeded));
}

#[tokio::test]
async fn test_fetch_passes_url_after_separator() {
    let harness = TestHarness::new().await;
    harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await.1.unwrap();

    let fetches = harness.executor.invocations_for(ToolKind::Fetcher).await;
    let args = fetches[0].args_lossy();
    let n = args.len();
    assert_eq!(args[n - 2], "--");
    assert_eq!(args[n - 1], VIDEO_URL);
}

#[tokio::test]
async fn test_requested_lossless_format_omits_bitrate() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(ToolKind::Fetcher, MockBehavior::succeed_with(&["fetch/Song.webm"]))
        .await;

    let request = JobRequest::FetchAndTranscode {
        url: VIDEO_URL.to_string(),
        format: Some("flac".to_string()),
        bitrate_kbps: None,
    };
    let (job, result) = harness.coordinator.run(request).await;
    let result = result.unwrap();

    let transcode = &harness.executor.invocations_for(ToolKind::Transcoder).await[0];
    assert!(transcode.has_arg_pair("-c:a", "flac"));
    assert!(!transcode.args_lossy().contains(&"-b:a".to_string()));
    assert_eq!(result.files, vec![workspace_of(&job).join("Song.flac")]);
}

#[tokio::test]
async fn test_fetch_tool_error_is_terminal() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(
            ToolKind::Fetcher,
            MockBehavior::fail(1, "ERROR: [generic] Unsupported URL"),
        )
        .await;

    let (job, result) = harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await;
    let err = result.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::ToolError {
            tool: ToolKind::Fetcher,
            exit_code: Some(1),
            ..
        }
    ));
    assert_eq!(err.user_message(), "Download failed: ERROR: [generic] Unsupported URL");
    assert_eq!(harness.executor.invocation_count().await, 1);
    assert_eq!(job.status, JobStatus::Failed);
    assert!(matches!(
        job.state,
        JobState::Failed {
            kind: FailureKind::ToolError,
            ..
        }
    ));
}

#[tokio::test]
async fn test_fetch_timeout_is_distinct_from_tool_error() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(ToolKind::Fetcher, MockBehavior::Timeout)
        .await;

    let (job, result) = harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await;
    let err = result.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Timeout {
            tool: ToolKind::Fetcher,
            timeout_secs: 600
        }
    ));
    assert_eq!(harness.executor.invocation_count().await, 1);
    assert_eq!(job.stages.len(), 1);
    assert_eq!(job.stages[0].failure, Some(FailureKind::Timeout));
}

#[tokio::test]
async fn test_transcode_without_output_is_missing_output() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(ToolKind::Fetcher, MockBehavior::succeed_with(&["fetch/Song.webm"]))
        .await;
    harness
        .executor
        .push_behavior(ToolKind::Transcoder, MockBehavior::succeed_with(&[]))
        .await;

    let (job, result) = harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await;
    let err = result.unwrap_err();

    match &err {
        PipelineError::MissingOutput { tool, expected, .. } => {
            assert_eq!(*tool, ToolKind::Transcoder);
            assert_eq!(expected, "Song.mp3");
        }
        other => panic!("expected MissingOutput, got {:?}", other),
    }
    assert!(matches!(
        job.state,
        JobState::Failed {
            kind: FailureKind::MissingOutput,
            ..
        }
    ));
    assert_eq!(job.stages[1].exit_code, Some(0));
}

#[tokio::test]
async fn test_transcode_missing_output_lists_stray_files() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(ToolKind::Fetcher, MockBehavior::succeed_with(&["fetch/Song.webm"]))
        .await;
    harness
        .executor
        .push_behavior(ToolKind::Transcoder, MockBehavior::succeed_with(&["Song.tmp.mp3"]))
        .await;

    let (job, result) = harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await;
    let workspace = workspace_of(&job);

    match result {
        Err(PipelineError::MissingOutput {
            tool, partial_files, ..
        }) => {
            assert_eq!(tool, ToolKind::Transcoder);
            // The fetched source belongs to the previous stage
            assert_eq!(partial_files, vec![workspace.join("Song.tmp.mp3")]);
        }
        other => panic!("expected MissingOutput, got {:?}", other),
    }
    assert!(job.stages[0].partial_outputs.is_empty());
    assert_eq!(job.stages[1].partial_outputs, vec![workspace.join("Song.tmp.mp3")]);
}

#[tokio::test]
async fn test_fetch_failure_reports_partial_download() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(
            ToolKind::Fetcher,
            MockBehavior::Fail {
                exit_code: 1,
                stderr: "ERROR: interrupted".to_string(),
                files: vec!["fetch/Song.webm.part".to_string()],
            },
        )
        .await;

    let (job, result) = harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await;
    let err = result.unwrap_err();
    let partial = workspace_of(&job).join("fetch/Song.webm.part");

    match &err {
        PipelineError::ToolError {
            tool, diagnostic, ..
        } => {
            assert_eq!(*tool, ToolKind::Fetcher);
            assert!(diagnostic.starts_with("ERROR: interrupted"));
            assert!(diagnostic.contains(&partial.display().to_string()));
        }
        other => panic!("expected ToolError, got {:?}", other),
    }
    assert_eq!(err.user_message(), "Download failed: ERROR: interrupted");
    assert_eq!(job.stages.len(), 1);
    assert_eq!(job.stages[0].partial_outputs, vec![partial]);
}

#[tokio::test]
async fn test_transcode_failure_keeps_fetched_file() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(ToolKind::Fetcher, MockBehavior::succeed_with(&["fetch/Song.webm"]))
        .await;
    harness
        .executor
        .push_behavior(
            ToolKind::Transcoder,
            MockBehavior::fail(1, "Unknown encoder 'libmp3lame'"),
        )
        .await;

    let (job, result) = harness.coordinator.run(fixtures::fetch_request(VIDEO_URL)).await;
    assert!(matches!(
        result,
        Err(PipelineError::ToolError {
            tool: ToolKind::Transcoder,
            ..
        })
    ));
    assert!(workspace_of(&job).join("fetch/Song.webm").exists());
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_invalid_url_rejected_without_invocation() {
    let harness = TestHarness::new().await;

    for url in ["", "not a url", "ftp://example.com/song", "--exec=rm"] {
        let (job, result) = harness.coordinator.run(fixtures::fetch_request(url)).await;
        assert!(
            matches!(
                result,
                Err(PipelineError::Validation(ValidationError::InvalidUrl { .. }))
            ),
            "accepted {:?}",
            url
        );
        assert!(job.workspace.is_none());
    }

    assert_eq!(harness.executor.invocation_count().await, 0);
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_unknown_format_and_bad_bitrate_rejected() {
    let harness = TestHarness::new().await;

    let request = JobRequest::FetchAndTranscode {
        url: VIDEO_URL.to_string(),
        format: Some("midi".to_string()),
        bitrate_kbps: None,
    };
    let (_, result) = harness.coordinator.run(request).await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::UnsupportedFormat { .. }))
    ));

    let request = JobRequest::FetchAndTranscode {
        url: VIDEO_URL.to_string(),
        format: None,
        bitrate_kbps: Some(8),
    };
    let (_, result) = harness.coordinator.run(request).await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::InvalidParameter {
            name: "bitrate_kbps",
            ..
        }))
    ));

    assert_eq!(harness.executor.invocation_count().await, 0);
}

#[tokio::test]
async fn test_stem_count_outside_allowed_set() {
    let harness = TestHarness::new().await;

    for stems in [0, 1, 3, 6] {
        let (job, result) = harness
            .coordinator
            .run(fixtures::separate_request("song.wav", stems))
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::Validation(ValidationError::InvalidParameter {
                name: "stems",
                ..
            }))
        ));
        assert!(matches!(
            job.state,
            JobState::Failed {
                kind: FailureKind::ValidationError,
                ..
            }
        ));
    }

    assert_eq!(harness.executor.invocation_count().await, 0);
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_text_file_rejected_for_separation() {
    let harness = TestHarness::new().await;

    let (_, result) = harness
        .coordinator
        .run(fixtures::separate_request("notes.txt", 2))
        .await;

    match result {
        Err(PipelineError::Validation(ValidationError::UnsupportedFormat { extension, allowed })) => {
            assert_eq!(extension, "txt");
            assert!(allowed.contains(&"wav".to_string()));
        }
        other => panic!("expected UnsupportedFormat, got {:?}", other),
    }
    assert_eq!(harness.executor.invocation_count().await, 0);
    assert_eq!(harness.workspace_count(), 0);
}

#[tokio::test]
async fn test_empty_upload_rejected() {
    let harness = TestHarness::new().await;
    let request = JobRequest::SeparateStems {
        input: stemdeck_core::UploadedFile {
            file_name: "song.wav".to_string(),
            data: vec![],
        },
        stems: 2,
    };

    let (_, result) = harness.coordinator.run(request).await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::EmptyInput { .. }))
    ));
    assert_eq!(harness.executor.invocation_count().await, 0);
}

#[tokio::test]
async fn test_allow_list_is_configurable() {
    let config = PipelineConfig {
        allowed_input_extensions: vec!["flac".to_string()],
        ..Default::default()
    };
    let harness = TestHarness::with_config(config).await;

    let (_, result) = harness
        .coordinator
        .run(fixtures::separate_request("song.wav", 2))
        .await;
    assert!(result.is_err());

    let (_, result) = harness
        .coordinator
        .run(fixtures::separate_request("SONG.FLAC", 2))
        .await;
    assert!(result.is_ok());
}

// =============================================================================
// Stem separation
// =============================================================================

#[tokio::test]
async fn test_wav_four_stems_lists_every_produced_file() {
    let harness = TestHarness::new().await;
    let produced = [
        "stems/song/vocals.wav",
        "stems/song/drums.wav",
        "stems/song/bass.wav",
        "stems/song/other.wav",
    ];
    harness
        .executor
        .push_behavior(ToolKind::Separator, MockBehavior::succeed_with(&produced))
        .await;

    let (job, result) = harness
        .coordinator
        .run(fixtures::separate_request("song.wav", 4))
        .await;
    let result = result.expect("job should succeed");
    let workspace = workspace_of(&job);

    let invocations = harness.executor.invocations().await;
    assert_eq!(invocations.len(), 1);
    assert!(invocations[0].has_arg_pair("-p", "spleeter:4stems"));
    assert_eq!(
        invocations[0].args_lossy().last().unwrap(),
        &workspace.join("input/song.wav").to_string_lossy().to_string()
    );

    let mut expected: Vec<_> = produced.iter().map(|p| workspace.join(p)).collect();
    expected.sort();
    assert_eq!(result.files, expected);
    assert_eq!(result.kind, ResultKind::StemSet);
    assert!(result
        .message
        .starts_with("Audio processing complete! Files saved in:"));

    // The upload was staged into the workspace.
    assert!(workspace.join("input/song.wav").is_file());
}

#[tokio::test]
async fn test_empty_stem_is_reported_not_listed() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(
            ToolKind::Separator,
            MockBehavior::SucceedWithEmpty {
                files: vec![
                    "stems/song/vocals.wav".to_string(),
                    "stems/song/drums.wav".to_string(),
                    "stems/song/other.wav".to_string(),
                ],
                empty: vec!["stems/song/bass.wav".to_string()],
            },
        )
        .await;

    let (job, result) = harness
        .coordinator
        .run(fixtures::separate_request("song.wav", 4))
        .await;
    let result = result.expect("job should succeed");
    let bass = workspace_of(&job).join("stems/song/bass.wav");

    assert_eq!(result.files.len(), 3);
    assert!(!result.files.contains(&bass));
    assert!(result.message.contains("Skipped empty stems"));
    assert!(result.message.contains(&bass.display().to_string()));
    assert_eq!(job.stages[0].empty_outputs, vec![bass.clone()]);
    assert_eq!(result.stages[0].empty_outputs, vec![bass]);
}

#[tokio::test]
async fn test_uploaded_name_cannot_escape_workspace() {
    let harness = TestHarness::new().await;

    let (job, result) = harness
        .coordinator
        .run(fixtures::separate_request("../../outside.wav", 2))
        .await;
    result.unwrap();

    assert!(workspace_of(&job).join("input/outside.wav").is_file());
    assert!(!harness.temp_dir.path().join("outside.wav").exists());
}

#[tokio::test]
async fn test_separator_failure_reports_partial_output() {
    let harness = TestHarness::new().await;
    harness
        .executor
        .push_behavior(
            ToolKind::Separator,
            MockBehavior::Fail {
                exit_code: 137,
                stderr: "Killed".to_string(),
                files: vec!["stems/song/vocals.wav".to_string()],
            },
        )
        .await;

    let (job, result) = harness
        .coordinator
        .run(fixtures::separate_request("song.wav", 2))
        .await;

    match result {
        Err(PipelineError::ToolError { diagnostic, .. }) => {
            assert!(diagnostic.contains("Killed"));
            assert!(diagnostic.contains("partial output"));
            assert!(diagnostic.contains("vocals.wav"));
        }
        other => panic!("expected ToolError, got {:?}", other),
    }
    assert_eq!(job.stages[0].partial_outputs.len(), 1);
    assert_eq!(job.status, JobStatus::Failed);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelled_job_runs_no_stage() {
    let harness = TestHarness::new().await;
    let request = fixtures::fetch_request(VIDEO_URL);
    let mut job = Job::new(request.kind(), request.describe_input());
    let plan = harness.coordinator.begin(&mut job, request).unwrap();
    assert_eq!(job.state, JobState::Validating);

    let cancel = CancelFlag::new();
    cancel.cancel();
    let result = harness
        .coordinator
        .execute(&mut job, plan, &cancel, &NoopObserver)
        .await;

    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(harness.executor.invocation_count().await, 0);
}
