// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! `gopilot serve`: composition root of the orchestrator service.
//!
//! Wires configuration, container runtime, model gateway, tool dispatcher and
//! the HTTP router together, runs the idle reaper, and shuts down cleanly on
//! Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gopilot_core::application::{
    ContainerLifecycleManager, LifecycleSettings, Orchestrator, OrchestratorSettings, TaskDispatcher,
};
use gopilot_core::domain::config::OrchestratorConfig;
use gopilot_core::domain::container::ContainerRuntime;
use gopilot_core::infrastructure::event_bus::EventBus;
use gopilot_core::infrastructure::llm::build_gateway;
use gopilot_core::infrastructure::memory_runtime::InMemoryContainerRuntime;
use gopilot_core::infrastructure::runtime::DockerContainerRuntime;
use gopilot_core::presentation::api::{install_metrics_recorder, router, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RuntimeKind {
    /// Docker Engine via the local socket
    Docker,
    /// In-process fake; no containers are created (development only)
    Memory,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Container runtime backend
    #[arg(long, value_enum, env = "GOPILOT_RUNTIME", default_value = "docker")]
    pub runtime: RuntimeKind,

    /// Bind address (overrides configuration)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// HTTP port (overrides configuration)
    #[arg(long)]
    pub port: Option<u16>,
}

pub async fn serve(config_path: Option<PathBuf>, args: ServeArgs) -> Result<()> {
    let mut config = OrchestratorConfig::load_or_default(config_path)?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate().context("Invalid configuration")?;

    let metrics = install_metrics_recorder().context("Failed to install metrics recorder")?;
    let event_bus = EventBus::with_default_capacity();

    let runtime: Arc<dyn ContainerRuntime> = match args.runtime {
        RuntimeKind::Docker => Arc::new(
            DockerContainerRuntime::new(
                config.containers.docker_socket_path.clone(),
                config.containers.stop_timeout,
            )
            .context("Failed to initialize Docker runtime")?,
        ),
        RuntimeKind::Memory => {
            warn!("Using the in-memory container runtime; workspace containers are simulated");
            Arc::new(InMemoryContainerRuntime::new())
        }
    };
    match runtime.ping().await {
        Ok(()) => info!("Container runtime reachable"),
        Err(e) => warn!("Container runtime not reachable yet: {}", e),
    }

    let lifecycle = Arc::new(ContainerLifecycleManager::new(
        runtime,
        LifecycleSettings::from_config(&config),
        event_bus.clone(),
    ));
    let dispatcher = Arc::new(TaskDispatcher::from_config(&config).context("Failed to configure tool servers")?);
    let gateway = build_gateway(&config).context("Failed to configure model gateway")?;
    let orchestrator = Arc::new(Orchestrator::new(
        lifecycle.clone(),
        dispatcher,
        gateway,
        event_bus.clone(),
        OrchestratorSettings::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let reaper = lifecycle.spawn_reaper(config.containers.reap_interval, shutdown.clone());

    let mut state = AppState::new(orchestrator, event_bus)
        .with_metrics(metrics)
        .with_shutdown(shutdown.clone());
    match &config.server.jwt_secret {
        Some(secret) => state = state.with_jwt_secret(secret),
        None => warn!("JWT_SECRET is not set; the API accepts unauthenticated requests"),
    }
    let app = router(state, config.server.allowed_origin.as_deref());

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("gopilot orchestrator listening on {}", addr);
    if let Some(public_url) = &config.server.public_url {
        info!("Public URL: {}", public_url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("HTTP server error")?;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        error!("Idle reaper task failed: {}", e);
    }
    info!("gopilot orchestrator stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels `token` so background tasks stop too.
async fn shutdown_signal(token: CancellationToken) {
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
        _ = token.cancelled() => {}
    }
    token.cancel();
}
