// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! `gopilot-worker`: the process started in every workspace container.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use gopilot_worker::{router, WorkerConfig, WorkerState, Workspace};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging()?;

    let config = WorkerConfig::from_env().context("Failed to read worker configuration")?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        workspace_id = %config.workspace_id,
        workspace_path = %config.workspace_path.display(),
        "Starting gopilot workspace worker"
    );

    let state = Arc::new(WorkerState::new(Workspace::new(config)));

    // Prepare the checkout in the background; tool calls wait for it.
    let init_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = init_state.workspace.ensure_initialized().await {
            error!(error = %e, "Workspace initialization failed; retrying on first tool call");
        }
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Worker listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Worker server error")?;

    info!("Worker stopped");
    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
