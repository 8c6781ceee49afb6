//! Mock stage executor for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::stage::{
    resolve_outputs, OutputPattern, StageExecutor, StageFailure, StageInvocation, StageOutcome,
    StageResult, ToolKind,
};

/// Content written for every mock output file.
const MOCK_CONTENT: &[u8] = b"mock output";

/// Scripted behavior for one invocation.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Write a file satisfying the expected output, then exit 0.
    SucceedMatching,
    /// Write these files (relative to the working directory), then exit 0.
    /// With no files this is a tool that lies about producing output.
    Succeed { files: Vec<String> },
    /// Like `Succeed`, but also writes `empty` as zero-byte files.
    SucceedWithEmpty {
        files: Vec<String>,
        empty: Vec<String>,
    },
    /// Write these files, then exit non-zero with `stderr` as diagnostic.
    Fail {
        exit_code: i32,
        stderr: String,
        files: Vec<String>,
    },
    /// Report a timeout.
    Timeout,
    /// Panic inside the executor, as a buggy stage would.
    Panic,
}

impl MockBehavior {
    pub fn succeed_with(files: &[&str]) -> Self {
        Self::Succeed {
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn fail(exit_code: i32, stderr: &str) -> Self {
        Self::Fail {
            exit_code,
            stderr: stderr.to_string(),
            files: vec![],
        }
    }
}

/// Mock implementation of the StageExecutor trait.
///
/// Provides controllable behavior for testing:
/// - Record every invocation for assertions
/// - Queue per-tool behaviors, consumed in order
/// - Fall back to a per-tool default, then to [`MockBehavior::SucceedMatching`]
///
/// Output verification goes through the real discovery code, so a scripted
/// success that writes nothing surfaces as a missing-output failure.
///
/// # Example
///
/// ```rust,ignore
/// use stemdeck_core::testing::{MockBehavior, MockStageExecutor};
///
/// let executor = MockStageExecutor::new();
/// executor
///     .push_behavior(ToolKind::Fetcher, MockBehavior::succeed_with(&["fetch/Song.webm"]))
///     .await;
///
/// // ... run a job ...
///
/// assert_eq!(executor.invocation_count().await, 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockStageExecutor {
    invocations: Arc<RwLock<Vec<StageInvocation>>>,
    queued: Arc<RwLock<HashMap<ToolKind, VecDeque<MockBehavior>>>>,
    defaults: Arc<RwLock<HashMap<ToolKind, MockBehavior>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl MockStageExecutor {
    /// Create a new mock executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a behavior for the next invocation of `tool`.
    pub async fn push_behavior(&self, tool: ToolKind, behavior: MockBehavior) {
        self.queued
            .write()
            .await
            .entry(tool)
            .or_default()
            .push_back(behavior);
    }

    /// Set the behavior used for `tool` once its queue is empty.
    pub async fn set_behavior(&self, tool: ToolKind, behavior: MockBehavior) {
        self.defaults.write().await.insert(tool, behavior);
    }

    /// Delay every invocation by `delay` before it completes.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Get all recorded invocations.
    pub async fn invocations(&self) -> Vec<StageInvocation> {
        self.invocations.read().await.clone()
    }

    /// Get the invocations of one tool.
    pub async fn invocations_for(&self, tool: ToolKind) -> Vec<StageInvocation> {
        self.invocations
            .read()
            .await
            .iter()
            .filter(|i| i.tool == tool)
            .cloned()
            .collect()
    }

    /// Get the number of invocations performed.
    pub async fn invocation_count(&self) -> usize {
        self.invocations.read().await.len()
    }

    async fn next_behavior(&self, tool: ToolKind) -> MockBehavior {
        if let Some(behavior) = self
            .queued
            .write()
            .await
            .get_mut(&tool)
            .and_then(|q| q.pop_front())
        {
            return behavior;
        }
        self.defaults
            .read()
            .await
            .get(&tool)
            .cloned()
            .unwrap_or(MockBehavior::SucceedMatching)
    }
}

/// Relative paths that satisfy `pattern`.
fn matching_files(pattern: &OutputPattern) -> Vec<PathBuf> {
    match pattern {
        OutputPattern::File(path) => vec![path.clone()],
        OutputPattern::Glob { dir, pattern } => vec![dir.join(pattern.replace('*', "mock"))],
        OutputPattern::Tree(dir) => vec![
            dir.join("mock").join("vocals.wav"),
            dir.join("mock").join("accompaniment.wav"),
        ],
    }
}

async fn write_files(working_dir: &Path, files: &[PathBuf]) {
    for file in files {
        let path = working_dir.join(file);
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let _ = tokio::fs::write(&path, MOCK_CONTENT).await;
    }
}

#[async_trait]
impl StageExecutor for MockStageExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, invocation: &StageInvocation) -> StageResult {
        self.invocations.write().await.push(invocation.clone());

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.next_behavior(invocation.tool).await;
        let failed = |exit_code, diagnostic: String, reason| StageResult {
            tool: invocation.tool,
            exit_code,
            diagnostic,
            duration_ms: 1,
            outcome: StageOutcome::Failed { reason },
        };

        let written = match behavior {
            MockBehavior::SucceedMatching => matching_files(&invocation.expected_output),
            MockBehavior::Succeed { files } => files.into_iter().map(PathBuf::from).collect(),
            MockBehavior::SucceedWithEmpty { files, empty } => {
                for file in empty {
                    let path = invocation.working_dir.join(file);
                    if let Some(parent) = path.parent() {
                        let _ = tokio::fs::create_dir_all(parent).await;
                    }
                    let _ = tokio::fs::write(&path, b"").await;
                }
                files.into_iter().map(PathBuf::from).collect()
            }
            MockBehavior::Fail {
                exit_code,
                stderr,
                files,
            } => {
                let files: Vec<PathBuf> = files.into_iter().map(PathBuf::from).collect();
                write_files(&invocation.working_dir, &files).await;
                return failed(Some(exit_code), stderr, StageFailure::ToolError);
            }
            MockBehavior::Timeout => {
                return failed(None, String::new(), StageFailure::Timeout);
            }
            MockBehavior::Panic => panic!("mock {} stage panicked", invocation.tool),
        };

        write_files(&invocation.working_dir, &written).await;
        let outputs = resolve_outputs(&invocation.working_dir, &invocation.expected_output).await;
        if outputs.is_empty() {
            return failed(Some(0), String::new(), StageFailure::MissingOutput);
        }

        StageResult {
            tool: invocation.tool,
            exit_code: Some(0),
            diagnostic: String::new(),
            duration_ms: 1,
            outcome: StageOutcome::Succeeded { outputs },
        }
    }
}
