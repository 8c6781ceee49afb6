use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use stemdeck_core::{
    DiscardOutcome, FailureKind, JobRequest, JobSnapshot, JobStatus, PipelineError,
    ResultDescriptor, ResultKind, UploadedFile,
};
use tracing::{debug, warn};

use crate::state::AppState;

/// Stem preset used when the form does not name one.
const DEFAULT_STEMS: i64 = 4;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FetchJobBody {
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    /// Hold the request open until the job finishes.
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

/// Finished job
#[derive(Debug, Serialize)]
pub struct JobSuccessResponse {
    pub success: String,
    pub job_id: String,
    pub kind: ResultKind,
    pub files: Vec<PathBuf>,
}

impl From<ResultDescriptor> for JobSuccessResponse {
    fn from(result: ResultDescriptor) -> Self {
        Self {
            success: result.message,
            job_id: result.job_id,
            kind: result.kind,
            files: result.files,
        }
    }
}

/// Job started in the background
#[derive(Debug, Serialize)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSnapshot>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DiscardResponse {
    pub job_id: String,
    pub outcome: DiscardOutcome,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

type ApiError = (StatusCode, Json<JobErrorResponse>);

fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::ValidationError => StatusCode::BAD_REQUEST,
        FailureKind::ToolError | FailureKind::MissingOutput => StatusCode::BAD_GATEWAY,
        FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::Cancelled => StatusCode::CONFLICT,
        FailureKind::WorkspaceError | FailureKind::Aborted => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn pipeline_error(err: &PipelineError, job_id: Option<String>) -> ApiError {
    let kind = err.kind();
    (
        status_for(kind),
        Json(JobErrorResponse {
            error: err.user_message(),
            kind: kind.as_str().to_string(),
            job_id,
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(JobErrorResponse {
            error: message.into(),
            kind: FailureKind::ValidationError.as_str().to_string(),
            job_id: None,
        }),
    )
}

/// Keeps the status axum assigns, so an oversized upload reports 413.
fn multipart_error(context: &str, err: MultipartError) -> ApiError {
    let status = err.status();
    let kind = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        FailureKind::ValidationError.as_str()
    };
    warn!(error = %err, status = %status, "Rejected multipart body");
    (
        status,
        Json(JobErrorResponse {
            error: format!("{}: {}", context, err.body_text()),
            kind: kind.to_string(),
            job_id: None,
        }),
    )
}

fn not_found(id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(JobErrorResponse {
            error: format!("Job not found: {}", id),
            kind: "not_found".to_string(),
            job_id: Some(id.to_string()),
        }),
    )
}

/// Submits the request and either waits for the result or hands back the id.
async fn run_job(state: &AppState, request: JobRequest, wait: bool) -> Result<Response, ApiError> {
    let handle = state
        .supervisor()
        .submit(request)
        .await
        .map_err(|e| pipeline_error(&e, None))?;
    let job_id = handle.id().to_string();

    if !wait {
        debug!(job_id = %job_id, "Job accepted without waiting");
        return Ok((
            StatusCode::ACCEPTED,
            Json(JobAcceptedResponse {
                job_id,
                status: JobStatus::Pending,
            }),
        )
            .into_response());
    }

    match handle.wait().await {
        Ok(result) => Ok(Json(JobSuccessResponse::from(result)).into_response()),
        Err(e) => Err(pipeline_error(&e, Some(job_id))),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Fetch a URL and transcode it to the requested format
pub async fn create_fetch_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FetchJobBody>,
) -> Result<Response, ApiError> {
    let request = JobRequest::FetchAndTranscode {
        url: body.url,
        format: body.format,
        bitrate_kbps: body.bitrate_kbps,
    };
    run_job(&state, request, body.wait).await
}

/// Separate an uploaded file into stems
pub async fn create_separate_job(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut input: Option<UploadedFile> = None;
    let mut stems = DEFAULT_STEMS;
    let mut wait = true;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_error("Invalid multipart body", e)),
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error("Failed to read file", e))?;
                input = Some(UploadedFile {
                    file_name,
                    data: data.to_vec(),
                });
            }
            "stems" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error("Failed to read stems", e))?;
                // Any integer goes to the core, which owns the allowed set.
                stems = text.trim().parse().map_err(|_| {
                    bad_request(format!("Invalid stems '{}': expected 2, 4 or 5", text.trim()))
                })?;
            }
            "wait" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error("Failed to read wait", e))?;
                wait = parse_flag(&text)
                    .ok_or_else(|| bad_request(format!("Invalid wait '{}'", text.trim())))?;
            }
            _ => {}
        }
    }

    let input = input.ok_or_else(|| bad_request("No file part in the request"))?;
    run_job(&state, JobRequest::SeparateStems { input, stems }, wait).await
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// List all known jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<ListJobsResponse> {
    let jobs = state.supervisor().list().await;
    let count = jobs.len();
    Json(ListJobsResponse { jobs, count })
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    state
        .supervisor()
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

/// Cancel a running job, or release a finished job's workspace
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DiscardResponse>, ApiError> {
    match state.supervisor().discard(&id).await {
        Ok(Some(outcome)) => Ok(Json(DiscardResponse {
            job_id: id,
            outcome,
        })),
        Ok(None) => Err(not_found(&id)),
        Err(e) => Err(pipeline_error(&e, Some(id))),
    }
}
