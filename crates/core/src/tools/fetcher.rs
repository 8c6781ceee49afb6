//! Media fetcher (yt-dlp) invocation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use super::ToolCommands;
use crate::stage::{OutputPattern, StageInvocation, ToolKind};

/// Subdirectory the fetcher writes into.
pub const FETCH_DIR: &str = "fetch";

/// Output template; the fetcher substitutes the media title and extension.
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

impl ToolCommands {
    /// Builds the fetch stage for `url`.
    ///
    /// The produced file name is chosen by the tool, so the expected output
    /// is any file in the fetch directory.
    pub fn fetch(&self, url: &Url, workspace: &Path, timeout: Duration) -> StageInvocation {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            "bestaudio/best".into(),
            "--no-playlist".into(),
            "--no-progress".into(),
        ];

        if let Some(location) = &self.config.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(location.clone().into_os_string());
        }

        args.push("-o".into());
        args.push(
            workspace
                .join(FETCH_DIR)
                .join(OUTPUT_TEMPLATE)
                .into_os_string(),
        );

        // Anything after "--" is positional, so a URL can never be read as an option.
        args.push("--".into());
        args.push(url.as_str().into());

        StageInvocation {
            tool: ToolKind::Fetcher,
            program: self.config.fetcher_path.clone(),
            args,
            working_dir: workspace.to_path_buf(),
            expected_output: OutputPattern::Glob {
                dir: PathBuf::from(FETCH_DIR),
                pattern: "*".to_string(),
            },
            timeout,
        }
    }
}
