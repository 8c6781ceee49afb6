//! Error types for the pipeline module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::stage::{StageFailure, ToolKind};
use crate::workspace::WorkspaceError;

/// Prefix of the diagnostic line listing files a failed stage left behind.
pub(crate) const PARTIAL_OUTPUT_NOTE: &str = "partial output: ";

/// Rejections raised before any tool is invoked.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The input or requested format is not accepted.
    #[error("Unsupported format '{extension}' (accepted: {})", .allowed.join(", "))]
    UnsupportedFormat {
        extension: String,
        allowed: Vec<String>,
    },

    /// A parameter is outside its accepted range or set.
    #[error("Invalid {name} '{value}': {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// The fetch URL is malformed or uses an unsupported scheme.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The uploaded input has no usable name or content.
    #[error("Empty input: {reason}")]
    EmptyInput { reason: String },
}

impl ValidationError {
    /// Short machine-readable reason, used as a metrics label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::EmptyInput { .. } => "empty_input",
        }
    }
}

/// Errors that terminate a job.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Job storage could not be allocated or written.
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Bad input format or parameter.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// External tool exited non-zero or could not be started.
    #[error("{tool} failed (exit code {exit_code:?}): {diagnostic}")]
    ToolError {
        tool: ToolKind,
        exit_code: Option<i32>,
        diagnostic: String,
    },

    /// External tool exceeded its allotted time and was killed.
    #[error("{tool} timed out after {timeout_secs} seconds")]
    Timeout { tool: ToolKind, timeout_secs: u64 },

    /// Tool reported success but its promised output is absent or empty.
    #[error("{tool} reported success but produced no output matching {expected}")]
    MissingOutput {
        tool: ToolKind,
        expected: String,
        partial_files: Vec<PathBuf>,
    },

    /// Job was cancelled between stages.
    #[error("Job cancelled")]
    Cancelled,

    /// The job's task ended without producing a result.
    #[error("Job aborted: {reason}")]
    Aborted { reason: String },
}

/// Serializable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    WorkspaceError,
    ValidationError,
    ToolError,
    Timeout,
    MissingOutput,
    Cancelled,
    Aborted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkspaceError => "workspace_error",
            Self::ValidationError => "validation_error",
            Self::ToolError => "tool_error",
            Self::Timeout => "timeout",
            Self::MissingOutput => "missing_output",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        }
    }
}

impl From<StageFailure> for FailureKind {
    fn from(failure: StageFailure) -> Self {
        match failure {
            StageFailure::ToolError => Self::ToolError,
            StageFailure::Timeout => Self::Timeout,
            StageFailure::MissingOutput => Self::MissingOutput,
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Workspace(_) => FailureKind::WorkspaceError,
            Self::Validation(_) => FailureKind::ValidationError,
            Self::ToolError { .. } => FailureKind::ToolError,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::MissingOutput { .. } => FailureKind::MissingOutput,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Aborted { .. } => FailureKind::Aborted,
        }
    }

    /// Relative seriousness, higher is worse.
    ///
    /// A missing output is a broken tool contract and ranks above a plain
    /// tool failure.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Cancelled => 0,
            Self::Validation(_) => 1,
            Self::ToolError { .. } | Self::Timeout { .. } => 2,
            Self::MissingOutput { .. } => 3,
            Self::Workspace(_) | Self::Aborted { .. } => 4,
        }
    }

    /// Human-readable message with the failing detail, suitable for callers.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::ToolError {
                tool, diagnostic, ..
            } if !diagnostic.is_empty() => {
                format!("{} failed: {}", tool.label(), last_line(diagnostic))
            }
            other => other.to_string(),
        }
    }
}

/// Last line the tool itself wrote; the partial-output note is ours.
fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty() && !l.starts_with(PARTIAL_OUTPUT_NOTE))
        .unwrap_or(text)
        .trim()
}
