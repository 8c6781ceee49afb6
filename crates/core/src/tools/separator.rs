//! Source separator (spleeter) invocation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ToolCommands;
use crate::pipeline::StemCount;
use crate::stage::{OutputPattern, StageInvocation, ToolKind};

/// Subdirectory the separator writes stems into.
pub const STEMS_DIR: &str = "stems";

impl ToolCommands {
    /// Builds the separation stage for `input`.
    ///
    /// The separator creates one subdirectory per input under the stems
    /// directory, and the stem file names depend on the preset, so every
    /// file in the tree counts as output.
    pub fn separate(
        &self,
        input: &Path,
        workspace: &Path,
        stems: StemCount,
        timeout: Duration,
    ) -> StageInvocation {
        let args: Vec<OsString> = vec![
            "separate".into(),
            "-p".into(),
            stems.preset().into(),
            "-o".into(),
            workspace.join(STEMS_DIR).into_os_string(),
            input.as_os_str().to_os_string(),
        ];

        StageInvocation {
            tool: ToolKind::Separator,
            program: self.config.separator_path.clone(),
            args,
            working_dir: workspace.to_path_buf(),
            expected_output: OutputPattern::Tree(PathBuf::from(STEMS_DIR)),
            timeout,
        }
    }
}
