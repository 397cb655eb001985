// crates/server/src/main.rs
//! NVR server binary.
//!
//! Opens the recording database, builds the job subsystem and serves the
//! HTTP API until Ctrl-C or SIGTERM. In-flight jobs get a bounded grace
//! period after the listener closes.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nvr_db::Database;
use nvr_server::{create_app, init_metrics, AppState, Cli, ServerConfig};
use nvr_server_jobs::JobSystem;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::from_env().apply_cli(cli);

    // Keep the guard alive so the file appender flushes on exit.
    let _log_guard = nvr_observability::init_tracing(&config.log)?;
    init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %config.db_path.display(),
        storage = %config.jobs.storage_path.display(),
        thumbnails = config.generate_thumbnails,
        "starting nvr-server"
    );

    let db = Database::new(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let jobs = Arc::new(JobSystem::new(db.clone(), config.jobs.clone()));
    let state = AppState::new(db, Arc::clone(&jobs), config.generate_thumbnails);
    let app = create_app(state);

    let addr = SocketAddr::new(config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if jobs.shutdown().await {
        tracing::info!("all jobs finished");
    } else {
        tracing::warn!("shutdown timed out with jobs still running");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
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
    tracing::info!("shutdown signal received");
}
