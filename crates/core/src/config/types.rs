use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::pipeline::AudioFormat;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the static index page.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Request body limit for uploads, in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_max_upload_mb() -> usize {
    200
}

/// Job workspace configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Root under which every job gets its own directory.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Release a finished job's workspace after this many seconds.
    /// Unset means the caller owns cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_secs: Option<u64>,
    /// At startup, remove workspaces older than this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_stale_after_secs: Option<u64>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            retention_secs: None,
            sweep_stale_after_secs: None,
        }
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("stemdeck")
}

/// External tool locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_fetcher_path")]
    pub fetcher_path: PathBuf,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_separator_path")]
    pub separator_path: PathBuf,
    /// Forwarded to the fetcher so it can post-process with a specific ffmpeg.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_location: Option<PathBuf>,
    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_ffmpeg_log_level")]
    pub ffmpeg_log_level: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fetcher_path: default_fetcher_path(),
            ffmpeg_path: default_ffmpeg_path(),
            separator_path: default_separator_path(),
            ffmpeg_location: None,
            ffmpeg_log_level: default_ffmpeg_log_level(),
        }
    }
}

fn default_fetcher_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_separator_path() -> PathBuf {
    PathBuf::from("spleeter")
}

fn default_ffmpeg_log_level() -> String {
    "warning".to_string()
}

/// Pipeline behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Format fetched media is transcoded to when no format is requested.
    #[serde(default = "default_target_format")]
    pub target_format: AudioFormat,
    /// Bitrate for lossy targets when no bitrate is requested.
    #[serde(default = "default_bitrate")]
    pub bitrate_kbps: u32,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_transcode_timeout")]
    pub transcode_timeout_secs: u64,
    #[serde(default = "default_separate_timeout")]
    pub separate_timeout_secs: u64,
    /// Input extensions accepted for stem separation (lowercase, no dot).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_input_extensions: Vec<String>,
    /// Cap on jobs running at once. Unset means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<usize>,
    /// Finished jobs without a live workspace kept for status queries.
    #[serde(default = "default_max_tracked_jobs")]
    pub max_tracked_jobs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_format: default_target_format(),
            bitrate_kbps: default_bitrate(),
            fetch_timeout_secs: default_fetch_timeout(),
            transcode_timeout_secs: default_transcode_timeout(),
            separate_timeout_secs: default_separate_timeout(),
            allowed_input_extensions: default_allowed_extensions(),
            max_concurrent_jobs: None,
            max_tracked_jobs: default_max_tracked_jobs(),
        }
    }
}

fn default_target_format() -> AudioFormat {
    AudioFormat::Mp3
}

fn default_bitrate() -> u32 {
    192
}

fn default_fetch_timeout() -> u64 {
    600
}

fn default_transcode_timeout() -> u64 {
    600
}

fn default_separate_timeout() -> u64 {
    1800
}

fn default_max_tracked_jobs() -> usize {
    1000
}

fn default_allowed_extensions() -> Vec<String> {
    ["mp3", "wav", "flac", "ogg", "m4a"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Sanitized config for API responses (local tool paths reduced to names)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: SanitizedServerConfig,
    pub pipeline: PipelineConfig,
    pub retention_secs: Option<u64>,
    pub tools: SanitizedToolsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServerConfig {
    pub port: u16,
    pub max_upload_mb: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedToolsConfig {
    pub fetcher: String,
    pub transcoder: String,
    pub separator: String,
}

fn tool_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: SanitizedServerConfig {
                port: config.server.port,
                max_upload_mb: config.server.max_upload_mb,
            },
            pipeline: config.pipeline.clone(),
            retention_secs: config.workspace.retention_secs,
            tools: SanitizedToolsConfig {
                fetcher: tool_name(&config.tools.fetcher_path),
                transcoder: tool_name(&config.tools.ffmpeg_path),
                separator: tool_name(&config.tools.separator_path),
            },
        }
    }
}
