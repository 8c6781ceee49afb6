//! Types for the pipeline module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;
use uuid::Uuid;

use super::error::{FailureKind, PipelineError, ValidationError};
use crate::stage::{StageInvocation, StageOutcome, StageResult, ToolKind};

/// Lowest bitrate accepted for lossy targets.
pub const MIN_BITRATE_KBPS: u32 = 32;
/// Highest bitrate accepted for lossy targets.
pub const MAX_BITRATE_KBPS: u32 = 512;

/// Pipeline variant selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch remote media, then transcode to the target format if needed.
    FetchAndTranscode,
    /// Split an uploaded track into stems.
    SeparateStems,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchAndTranscode => "fetch_and_transcode",
            Self::SeparateStems => "separate_stems",
        }
    }

    /// Short prefix used for workspace directory names.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::FetchAndTranscode => "fetch",
            Self::SeparateStems => "separate",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio format a fetched track is transcoded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// MPEG Audio Layer III
    Mp3,
    /// Advanced Audio Coding in an MPEG-4 container
    Aac,
    /// Ogg Vorbis
    #[serde(alias = "ogg")]
    OggVorbis,
    /// Opus
    Opus,
    /// Free Lossless Audio Codec
    Flac,
    /// WAVE (uncompressed)
    Wav,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 6] = [
        Self::Mp3,
        Self::Aac,
        Self::OggVorbis,
        Self::Opus,
        Self::Flac,
        Self::Wav,
    ];

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "m4a",
            Self::OggVorbis => "ogg",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::Wav => "wav",
        }
    }

    /// Returns the ffmpeg codec name for this format.
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Aac => "aac",
            Self::OggVorbis => "libvorbis",
            Self::Opus => "libopus",
            Self::Flac => "flac",
            Self::Wav => "pcm_s16le",
        }
    }

    /// Whether this format is lossless.
    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Flac | Self::Wav)
    }

    /// Parses a format name or extension, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "aac" | "m4a" => Some(Self::Aac),
            "ogg" | "ogg_vorbis" | "vorbis" => Some(Self::OggVorbis),
            "opus" => Some(Self::Opus),
            "flac" => Some(Self::Flac),
            "wav" => Some(Self::Wav),
            _ => None,
        }
    }

    /// Upper-case label used in user-facing messages.
    pub fn label(&self) -> String {
        self.extension().to_ascii_uppercase()
    }
}

/// Stem presets supported by the separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemCount {
    /// Vocals and accompaniment.
    Two,
    /// Vocals, drums, bass, other.
    Four,
    /// Vocals, drums, bass, piano, other.
    Five,
}

impl StemCount {
    pub const ALLOWED: [u8; 3] = [2, 4, 5];

    pub fn count(&self) -> u8 {
        match self {
            Self::Two => 2,
            Self::Four => 4,
            Self::Five => 5,
        }
    }

    /// Separator model preset, e.g. `spleeter:4stems`.
    pub fn preset(&self) -> String {
        format!("spleeter:{}stems", self.count())
    }
}

impl TryFrom<i64> for StemCount {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            5 => Ok(Self::Five),
            other => Err(ValidationError::InvalidParameter {
                name: "stems",
                value: other.to_string(),
                reason: "stem count must be one of 2, 4 or 5".to_string(),
            }),
        }
    }
}

/// A file uploaded by the caller.
#[derive(Clone)]
pub struct UploadedFile {
    /// Name as supplied by the client. Untrusted.
    pub file_name: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("file_name", &self.file_name)
            .field("size_bytes", &self.data.len())
            .finish()
    }
}

/// An inbound job request, as handed over by the transport layer.
#[derive(Debug, Clone)]
pub enum JobRequest {
    FetchAndTranscode {
        url: String,
        /// Requested output format; the configured default when absent.
        format: Option<String>,
        /// Requested bitrate; the configured default when absent.
        bitrate_kbps: Option<u32>,
    },
    SeparateStems {
        input: UploadedFile,
        /// Raw stem selector, validated against {2, 4, 5}.
        stems: i64,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::FetchAndTranscode { .. } => JobKind::FetchAndTranscode,
            Self::SeparateStems { .. } => JobKind::SeparateStems,
        }
    }

    /// Short description of the input for job listings.
    pub fn describe_input(&self) -> String {
        match self {
            Self::FetchAndTranscode { url, .. } => url.clone(),
            Self::SeparateStems { input, .. } => input.file_name.clone(),
        }
    }
}

/// Target of the transcode stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeTarget {
    pub format: AudioFormat,
    pub bitrate_kbps: u32,
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub enum JobPlan {
    FetchAndTranscode {
        url: Url,
        target: TranscodeTarget,
    },
    SeparateStems {
        /// Sanitized single-component file name.
        input_name: String,
        data: Vec<u8>,
        stems: StemCount,
    },
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Created,
    Validating,
    Running { stage: ToolKind },
    Succeeded,
    Failed { kind: FailureKind, message: String },
    Cancelled,
}

/// Coarse status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed { .. } | Self::Cancelled
        )
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Created | Self::Validating => JobStatus::Pending,
            Self::Running { .. } => JobStatus::Running,
            Self::Succeeded => JobStatus::Succeeded,
            Self::Failed { .. } | Self::Cancelled => JobStatus::Failed,
        }
    }

    fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Created, Validating) => true,
            (Validating, Running { .. } | Failed { .. } | Cancelled) => true,
            (Running { .. }, Running { .. } | Succeeded | Failed { .. } | Cancelled) => true,
            _ => false,
        }
    }
}

/// Record of one stage invocation, kept on the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub tool: ToolKind,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PathBuf>,
    /// Files left behind by a failed stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_outputs: Vec<PathBuf>,
    /// Zero-byte files the stage produced; never counted as outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub empty_outputs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub diagnostic: String,
}

impl StageRecord {
    pub fn new(invocation: &StageInvocation, result: &StageResult) -> Self {
        let (succeeded, failure, outputs) = match &result.outcome {
            StageOutcome::Succeeded { outputs } => (true, None, outputs.clone()),
            StageOutcome::Failed { reason } => (false, Some(FailureKind::from(*reason)), vec![]),
        };
        Self {
            tool: invocation.tool,
            args: invocation.args_lossy(),
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            succeeded,
            failure,
            outputs,
            partial_outputs: Vec::new(),
            empty_outputs: Vec::new(),
            diagnostic: result.diagnostic.clone(),
        }
    }
}

/// One unit of work triggered by one inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    /// URL or uploaded file name.
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    pub stages: Vec<StageRecord>,
    pub state: JobState,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            input: input.into(),
            workspace: None,
            stages: Vec::new(),
            state: JobState::Created,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Moves the job to `next`. Returns false and leaves the job untouched
    /// when the transition is not allowed.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(&next) {
            tracing::warn!(
                job_id = %self.id,
                from = ?self.state,
                to = ?next,
                "Ignoring invalid job state transition"
            );
            return false;
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = next.status();
        self.state = next;
        true
    }

    /// Moves the job to its terminal failure state for `error`.
    pub fn fail(&mut self, error: &PipelineError) -> bool {
        let next = match error {
            PipelineError::Cancelled => JobState::Cancelled,
            other => JobState::Failed {
                kind: other.kind(),
                message: other.to_string(),
            },
        };
        self.transition(next)
    }

    /// Number of external tool invocations made so far.
    pub fn invocation_count(&self) -> usize {
        self.stages.len()
    }
}

/// Kind of artifact set a job produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    AudioTrack,
    StemSet,
}

/// Artifacts produced by a successful job.
///
/// Once handed to the caller, the referenced files are the caller's
/// responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDescriptor {
    pub job_id: String,
    pub kind: ResultKind,
    pub files: Vec<PathBuf>,
    pub message: String,
    pub workspace: PathBuf,
    pub stages: Vec<StageRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_extension_and_codec() {
        assert_eq!(AudioFormat::Mp3.extension(), "mp3");
        assert_eq!(AudioFormat::Mp3.ffmpeg_codec(), "libmp3lame");
        assert_eq!(AudioFormat::Aac.extension(), "m4a");
        assert_eq!(AudioFormat::OggVorbis.ffmpeg_codec(), "libvorbis");
        assert_eq!(AudioFormat::Mp3.label(), "MP3");
    }

    #[test]
    fn test_audio_format_lossless() {
        assert!(AudioFormat::Flac.is_lossless());
        assert!(AudioFormat::Wav.is_lossless());
        assert!(!AudioFormat::Mp3.is_lossless());
        assert!(!AudioFormat::Opus.is_lossless());
    }

    #[test]
    fn test_audio_format_parse() {
        assert_eq!(AudioFormat::parse("MP3"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::parse(".m4a"), Some(AudioFormat::Aac));
        assert_eq!(AudioFormat::parse("ogg_vorbis"), Some(AudioFormat::OggVorbis));
        assert_eq!(AudioFormat::parse("midi"), None);
    }

    #[test]
    fn test_stem_count_from_integer() {
        assert_eq!(StemCount::try_from(2).unwrap(), StemCount::Two);
        assert_eq!(StemCount::try_from(4).unwrap().preset(), "spleeter:4stems");
        assert_eq!(StemCount::try_from(5).unwrap().count(), 5);

        for bad in [0, 1, 3, 6, 255, 300, -1] {
            let err = StemCount::try_from(bad).unwrap_err();
            assert!(matches!(
                err,
                ValidationError::InvalidParameter { name: "stems", .. }
            ));
        }
    }

    #[test]
    fn test_job_state_machine() {
        let mut job = Job::new(JobKind::FetchAndTranscode, "https://example.com/v");
        assert_eq!(job.status, JobStatus::Pending);

        // Validating cannot be skipped.
        assert!(!job.transition(JobState::Running {
            stage: ToolKind::Fetcher
        }));
        assert_eq!(job.state, JobState::Created);

        assert!(job.transition(JobState::Validating));
        assert!(job.transition(JobState::Running {
            stage: ToolKind::Fetcher
        }));
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.transition(JobState::Running {
            stage: ToolKind::Transcoder
        }));
        assert!(job.transition(JobState::Succeeded));
        assert!(job.finished_at.is_some());

        // Terminal states are final.
        assert!(!job.transition(JobState::Running {
            stage: ToolKind::Transcoder
        }));
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[test]
    fn test_job_fail_records_kind() {
        let mut job = Job::new(JobKind::SeparateStems, "song.txt");
        job.transition(JobState::Validating);
        let err = PipelineError::Validation(ValidationError::UnsupportedFormat {
            extension: "txt".to_string(),
            allowed: vec!["wav".to_string()],
        });
        assert!(job.fail(&err));
        assert_eq!(job.status, JobStatus::Failed);
        match &job.state {
            JobState::Failed { kind, message } => {
                assert_eq!(*kind, FailureKind::ValidationError);
                assert!(message.contains("txt"));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_job_is_failed_status() {
        let mut job = Job::new(JobKind::SeparateStems, "song.wav");
        job.transition(JobState::Validating);
        job.fail(&PipelineError::Cancelled);
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_job_serialization() {
        let job = Job::new(JobKind::SeparateStems, "song.wav");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "separate_stems");
        assert_eq!(json["state"]["type"], "created");
        assert_eq!(json["status"], "pending");
        assert!(json.get("workspace").is_none());
    }

    #[test]
    fn test_uploaded_file_debug_hides_bytes() {
        let file = UploadedFile {
            file_name: "a.wav".to_string(),
            data: vec![1, 2, 3],
        };
        let debug = format!("{:?}", file);
        assert!(debug.contains("size_bytes: 3"));
    }
}
