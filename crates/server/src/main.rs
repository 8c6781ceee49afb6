use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stemdeck_core::{
    load_config, probe_tools, validate_config, JobSupervisor, PipelineCoordinator,
    ProcessExecutor, SupervisorConfig, WorkspaceManager,
};
use stemdeck_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("STEMDECK_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("STEMDECK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );
    info!("Workspace root: {:?}", config.workspace.root);

    // Prepare the workspace root
    let workspaces = Arc::new(
        WorkspaceManager::new(&config.workspace.root)
            .await
            .with_context(|| {
                format!(
                    "Failed to prepare workspace root {:?}",
                    config.workspace.root
                )
            })?,
    );

    if let Some(secs) = config.workspace.sweep_stale_after_secs {
        // The manager logs what it removed.
        if let Err(e) = workspaces.sweep_stale(Duration::from_secs(secs)).await {
            warn!(error = %e, "Failed to sweep stale workspaces");
        }
    }

    // Missing tools are reported, not fatal: jobs needing them fail with a tool error.
    let probes = probe_tools(&config.tools).await;
    let missing: Vec<_> = probes
        .iter()
        .filter(|p| !p.available)
        .map(|p| p.tool.as_str())
        .collect();
    if !missing.is_empty() {
        warn!(missing = ?missing, "Some external tools are unavailable");
    }

    let coordinator = Arc::new(PipelineCoordinator::new(
        config.pipeline.clone(),
        config.tools.clone(),
        Arc::clone(&workspaces),
        Arc::new(ProcessExecutor::new()),
    ));
    let supervisor = Arc::new(JobSupervisor::new(
        coordinator,
        SupervisorConfig::from_config(&config),
    ));
    info!(
        max_concurrent_jobs = ?config.pipeline.max_concurrent_jobs,
        retention_secs = ?config.workspace.retention_secs,
        "Job supervisor ready"
    );

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&supervisor)));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let status = supervisor.status().await;
    info!(
        active_jobs = status.active_jobs,
        queued_jobs = status.queued_jobs,
        "Server shutting down"
    );

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
