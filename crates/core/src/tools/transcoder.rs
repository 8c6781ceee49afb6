//! Transcoder (ffmpeg) invocation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ToolCommands;
use crate::pipeline::TranscodeTarget;
use crate::stage::{OutputPattern, StageInvocation, ToolKind};

/// Name of the transcoded file: the input's stem with the target extension.
///
/// Built by appending rather than with `Path::with_extension`, which would
/// eat a dotted title such as `Live v1.2`.
pub fn transcoded_name(input: &Path, target: &TranscodeTarget) -> PathBuf {
    let mut name: OsString = input
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("output"));
    name.push(".");
    name.push(target.format.extension());
    PathBuf::from(name)
}

impl ToolCommands {
    /// Builds the transcode stage converting `input` into the workspace root.
    pub fn transcode(
        &self,
        input: &Path,
        workspace: &Path,
        target: &TranscodeTarget,
        timeout: Duration,
    ) -> StageInvocation {
        let output_name = transcoded_name(input, target);

        let mut args: Vec<OsString> = vec![
            "-nostdin".into(),
            "-y".into(), // Overwrite output
            "-loglevel".into(),
            self.config.ffmpeg_log_level.clone().into(),
            "-i".into(),
            input.as_os_str().to_os_string(),
            "-vn".into(),
            "-c:a".into(),
            target.format.ffmpeg_codec().into(),
        ];

        // Bitrate (for lossy formats)
        if !target.format.is_lossless() {
            args.push("-b:a".into());
            args.push(format!("{}k", target.bitrate_kbps).into());
        }

        args.push(workspace.join(&output_name).into_os_string());

        StageInvocation {
            tool: ToolKind::Transcoder,
            program: self.config.ffmpeg_path.clone(),
            args,
            working_dir: workspace.to_path_buf(),
            expected_output: OutputPattern::File(output_name),
            timeout,
        }
    }
}
