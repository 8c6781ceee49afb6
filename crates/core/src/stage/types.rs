//! Types for the stage module.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// External tool run by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// URL-based media fetcher.
    Fetcher,
    /// Audio transcoder.
    Transcoder,
    /// Multi-stem source separator.
    Separator,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetcher => "fetcher",
            Self::Transcoder => "transcoder",
            Self::Separator => "separator",
        }
    }

    /// Name of the step as shown to end users.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fetcher => "Download",
            Self::Transcoder => "Conversion",
            Self::Separator => "Separation",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage's output is expected to land, relative to its working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPattern {
    /// Exactly this file.
    File(PathBuf),
    /// Files directly inside `dir` whose name matches `pattern` (`*` wildcard).
    Glob { dir: PathBuf, pattern: String },
    /// Every file below `dir`, at any depth.
    Tree(PathBuf),
}

impl OutputPattern {
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Glob { dir, pattern } => dir.join(pattern).display().to_string(),
            Self::Tree(dir) => format!("{}/**", dir.display()),
        }
    }
}

/// One external-tool execution request.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub tool: ToolKind,
    /// Executable to run. Never a shell.
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// The job workspace.
    pub working_dir: PathBuf,
    pub expected_output: OutputPattern,
    pub timeout: Duration,
}

impl StageInvocation {
    /// Arguments as strings, for logs and records.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    /// Whether `flag` is immediately followed by `value` in the argument list.
    pub fn has_arg_pair(&self, flag: &str, value: &str) -> bool {
        self.args
            .windows(2)
            .any(|w| w[0] == *flag && w[1] == *value)
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailure {
    /// Non-zero exit, or the tool could not be started.
    ToolError,
    /// Killed after exceeding the timeout.
    Timeout,
    /// Exit zero, but no non-empty output matched the expected pattern.
    MissingOutput,
}

/// Outcome of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded { outputs: Vec<PathBuf> },
    Failed { reason: StageFailure },
}

/// Result of one stage invocation.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub tool: ToolKind,
    pub exit_code: Option<i32>,
    /// Captured stderr (tail).
    pub diagnostic: String,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StageOutcome::Succeeded { .. })
    }

    /// Verified output paths; empty on failure.
    pub fn outputs(&self) -> &[PathBuf] {
        match &self.outcome {
            StageOutcome::Succeeded { outputs } => outputs,
            StageOutcome::Failed { .. } => &[],
        }
    }

    pub fn failure(&self) -> Option<StageFailure> {
        match self.outcome {
            StageOutcome::Failed { reason } => Some(reason),
            StageOutcome::Succeeded { .. } => None,
        }
    }

    /// Outcome label for metrics and logs.
    pub fn outcome_label(&self) -> &'static str {
        match self.outcome {
            StageOutcome::Succeeded { .. } => "succeeded",
            StageOutcome::Failed {
                reason: StageFailure::ToolError,
            } => "tool_error",
            StageOutcome::Failed {
                reason: StageFailure::Timeout,
            } => "timeout",
            StageOutcome::Failed {
                reason: StageFailure::MissingOutput,
            } => "missing_output",
        }
    }
}
