use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::{handlers, jobs, middleware::metrics_middleware};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config().server.static_dir.clone();
    let upload_limit = state.config().server.max_upload_mb * 1024 * 1024;

    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/pipeline/status", get(handlers::pipeline_status))
        // Jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/fetch", post(jobs::create_fetch_job))
        .route(
            "/jobs/separate",
            post(jobs::create_separate_job).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .with_state(Arc::clone(&state));

    // Serve the index page, falling back to it for unknown paths
    let index_path = static_dir.join("index.html");
    let serve_dir = ServeDir::new(&static_dir).fallback(ServeFile::new(index_path));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics).with_state(state))
        .fallback_service(serve_dir)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
