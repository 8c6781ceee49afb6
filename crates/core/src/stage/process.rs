//! Stage executor backed by real OS processes.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::discover::resolve_outputs;
use super::traits::StageExecutor;
use super::types::{StageFailure, StageInvocation, StageOutcome, StageResult};

/// Bytes of stderr kept for diagnostics.
const DIAGNOSTIC_TAIL_BYTES: usize = 64 * 1024;

/// How long to keep draining stderr after the process is gone.
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Executes stages by spawning the configured program directly (no shell).
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    fn finish(
        invocation: &StageInvocation,
        start: Instant,
        exit_code: Option<i32>,
        diagnostic: String,
        outcome: StageOutcome,
    ) -> StageResult {
        StageResult {
            tool: invocation.tool,
            exit_code,
            diagnostic,
            duration_ms: start.elapsed().as_millis() as u64,
            outcome,
        }
    }
}

#[async_trait]
impl StageExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn run(&self, invocation: &StageInvocation) -> StageResult {
        let start = Instant::now();
        let tool = invocation.tool;
        debug!(
            tool = %tool,
            program = %invocation.program.display(),
            args = ?invocation.args_lossy(),
            "Spawning stage"
        );

        let spawned = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(tool = %tool, program = %invocation.program.display(), error = %e, "Failed to start tool");
                let diagnostic = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("{} not found: {}", invocation.program.display(), e)
                } else {
                    format!("failed to start {}: {}", invocation.program.display(), e)
                };
                return Self::finish(
                    invocation,
                    start,
                    None,
                    diagnostic,
                    StageOutcome::Failed {
                        reason: StageFailure::ToolError,
                    },
                );
            }
        };

        let reader = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));

        let waited = timeout(invocation.timeout, child.wait()).await;

        let status: Result<ExitStatus, std::io::Error> = match waited {
            Ok(status) => status,
            Err(_) => {
                let _ = child.kill().await;
                let diagnostic = drain(reader).await;
                warn!(
                    tool = %tool,
                    timeout_secs = invocation.timeout.as_secs(),
                    "Stage timed out, process killed"
                );
                return Self::finish(
                    invocation,
                    start,
                    None,
                    diagnostic,
                    StageOutcome::Failed {
                        reason: StageFailure::Timeout,
                    },
                );
            }
        };

        let diagnostic = drain(reader).await;

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                return Self::finish(
                    invocation,
                    start,
                    None,
                    format!("failed to wait for {}: {}", tool, e),
                    StageOutcome::Failed {
                        reason: StageFailure::ToolError,
                    },
                );
            }
        };

        if !status.success() {
            debug!(tool = %tool, exit_code = ?status.code(), "Stage exited with failure");
            return Self::finish(
                invocation,
                start,
                status.code(),
                diagnostic,
                StageOutcome::Failed {
                    reason: StageFailure::ToolError,
                },
            );
        }

        let outputs = resolve_outputs(&invocation.working_dir, &invocation.expected_output).await;
        let outcome = if outputs.is_empty() {
            warn!(
                tool = %tool,
                expected = %invocation.expected_output.describe(),
                "Stage exited cleanly but produced no output"
            );
            StageOutcome::Failed {
                reason: StageFailure::MissingOutput,
            }
        } else {
            StageOutcome::Succeeded { outputs }
        };

        Self::finish(invocation, start, status.code(), diagnostic, outcome)
    }
}

/// Reads a stream to the end, keeping only its last bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut stream: R) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > DIAGNOSTIC_TAIL_BYTES {
                    let excess = tail.len() - DIAGNOSTIC_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    tail
}

/// Collects what the stderr reader captured. A grandchild can keep the
/// pipe open after the tool exits, so the wait is bounded.
async fn drain(reader: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = reader else {
        return String::new();
    };
    let abort = handle.abort_handle();
    match timeout(STDERR_DRAIN_GRACE, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim_end().to_string(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}
