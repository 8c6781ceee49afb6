//! Stage execution.
//!
//! A stage is a single invocation of an external tool with a fixed argument
//! vector, a working directory, a timeout, and an expected output. The
//! executor runs it, captures the tool's stderr, and confirms the output
//! actually exists before reporting success.

mod discover;
mod process;
mod traits;
mod types;

pub use discover::{empty_files, list_files, resolve_outputs};
pub use process::ProcessExecutor;
pub use traits::StageExecutor;
pub use types::{OutputPattern, StageFailure, StageInvocation, StageOutcome, StageResult, ToolKind};
