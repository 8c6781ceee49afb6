//! External tool invocation builders.
//!
//! Each builder turns pipeline parameters into a
//! [`StageInvocation`](crate::stage::StageInvocation): the
//! argument vector, the working directory and the output the stage promises.

mod fetcher;
mod separator;
mod transcoder;

pub use fetcher::FETCH_DIR;
pub use separator::STEMS_DIR;
pub use transcoder::transcoded_name;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::config::ToolsConfig;
use crate::stage::ToolKind;

/// Builds invocations for the configured tools.
#[derive(Debug, Clone)]
pub struct ToolCommands {
    config: ToolsConfig,
}

impl ToolCommands {
    pub fn new(config: ToolsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }
}

/// Availability of one external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolProbe {
    pub tool: ToolKind,
    pub program: PathBuf,
    pub available: bool,
    /// First line of the tool's version output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Checks that every configured tool can be started.
///
/// A missing tool is not fatal: jobs needing it will fail with a tool
/// error, so this only logs a warning.
pub async fn probe_tools(config: &ToolsConfig) -> Vec<ToolProbe> {
    let checks = [
        (ToolKind::Fetcher, &config.fetcher_path, "--version"),
        (ToolKind::Transcoder, &config.ffmpeg_path, "-version"),
        (ToolKind::Separator, &config.separator_path, "--version"),
    ];

    let mut probes = Vec::with_capacity(checks.len());
    for (tool, program, flag) in checks {
        let probe = probe_one(tool, program, flag).await;
        if probe.available {
            info!(
                tool = %tool,
                program = %program.display(),
                version = probe.version.as_deref().unwrap_or("unknown"),
                "Tool available"
            );
        } else {
            warn!(
                tool = %tool,
                program = %program.display(),
                "Tool not available, jobs using it will fail"
            );
        }
        probes.push(probe);
    }
    probes
}

async fn probe_one(tool: ToolKind, program: &Path, flag: &str) -> ToolProbe {
    let output = timeout(
        Duration::from_secs(10),
        Command::new(program)
            .arg(flag)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let (available, version) = match output {
        Ok(Ok(out)) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout);
            let version = text
                .lines()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string());
            (true, version)
        }
        _ => (false, None),
    };

    ToolProbe {
        tool,
        program: program.to_path_buf(),
        available,
        version,
    }
}
