//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! backed by the mock stage executor, so the HTTP surface can be tested
//! without yt-dlp, ffmpeg or spleeter installed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use stemdeck_core::{
    config::{ServerConfig, WorkspaceConfig},
    testing::MockStageExecutor,
    Config, JobSupervisor, PipelineCoordinator, SupervisorConfig, WorkspaceManager,
};
use stemdeck_server::state::AppState;

/// Test fixture for E2E testing with a mock executor.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_fetch() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/jobs/fetch", json!({
///         "url": "https://example.com/watch?v=1"
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock executor - script tool outcomes and inspect invocations
    pub executor: MockStageExecutor,
    pub supervisor: Arc<JobSupervisor>,
    /// Holds the workspace root and static directory
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default configuration.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test fixture after adjusting the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let static_dir = temp_dir.path().join("static");
        std::fs::create_dir_all(&static_dir).expect("Failed to create static dir");
        std::fs::write(static_dir.join("index.html"), "<html>stemdeck</html>")
            .expect("Failed to write index page");

        let mut config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
                static_dir,
                ..Default::default()
            },
            workspace: WorkspaceConfig {
                root: temp_dir.path().join("jobs"),
                ..Default::default()
            },
            ..Default::default()
        };
        adjust(&mut config);

        let workspaces = Arc::new(
            WorkspaceManager::new(&config.workspace.root)
                .await
                .expect("Failed to create workspace root"),
        );
        let executor = MockStageExecutor::new();
        let coordinator = Arc::new(PipelineCoordinator::new(
            config.pipeline.clone(),
            config.tools.clone(),
            workspaces,
            Arc::new(executor.clone()),
        ));
        let supervisor = Arc::new(JobSupervisor::new(
            coordinator,
            SupervisorConfig::from_config(&config),
        ));

        let state = Arc::new(AppState::new(config, Arc::clone(&supervisor)));
        let router = stemdeck_server::api::create_router(state);

        Self {
            router,
            executor,
            supervisor,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Request::builder().method("GET").uri(path).body(Body::empty()).unwrap())
            .await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    /// Send a POST request with a multipart form body.
    pub async fn post_multipart(&self, path: &str, form: MultipartForm) -> TestResponse {
        let (content_type, body) = form.finish();
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", content_type)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.send(
            Request::builder()
                .method("DELETE")
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Send a GET request and return the raw body text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Minimal multipart/form-data encoder for upload tests.
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: "stemdeck-test-boundary".to_string(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                self.boundary, name, file_name
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
