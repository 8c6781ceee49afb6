//! Job orchestration pipeline.
//!
//! The coordinator takes one inbound request through validation, workspace
//! acquisition and a fixed sequence of tool stages:
//!
//! - fetch and transcode: fetch remote media, then transcode it unless it is
//!   already in the target format
//! - separate stems: stage an uploaded track, then split it into stems
//!
//! Every failure is terminal for the job and is never retried.

mod coordinator;
mod error;
mod types;

pub use coordinator::{CancelFlag, JobObserver, NoopObserver, PipelineCoordinator};
pub use error::{FailureKind, PipelineError, ValidationError};
pub use types::{
    AudioFormat, Job, JobKind, JobPlan, JobRequest, JobState, JobStatus, ResultDescriptor,
    ResultKind, StageRecord, StemCount, TranscodeTarget, UploadedFile, MAX_BITRATE_KBPS,
    MIN_BITRATE_KBPS,
};
