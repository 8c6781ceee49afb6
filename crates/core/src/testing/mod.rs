//! Testing utilities and mock implementations.
//!
//! The mock executor stands in for the external tools, so the whole
//! pipeline can be exercised without yt-dlp, ffmpeg or spleeter installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use stemdeck_core::testing::{fixtures, MockStageExecutor};
//!
//! let executor = MockStageExecutor::new();
//! let request = fixtures::separate_request("song.wav", 4);
//! ```

mod mock_executor;

pub use mock_executor::{MockBehavior, MockStageExecutor};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::pipeline::{JobRequest, UploadedFile};

    /// A fetch request using the configured format and bitrate.
    pub fn fetch_request(url: &str) -> JobRequest {
        JobRequest::FetchAndTranscode {
            url: url.to_string(),
            format: None,
            bitrate_kbps: None,
        }
    }

    /// A separation request with a small non-empty upload.
    pub fn separate_request(file_name: &str, stems: i64) -> JobRequest {
        JobRequest::SeparateStems {
            input: UploadedFile {
                file_name: file_name.to_string(),
                data: b"RIFF\0\0\0\0WAVE".to_vec(),
            },
            stems,
        }
    }
}
