// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! # gopilot CLI
//!
//! The `gopilot` binary runs the orchestrator service and talks to it.
//!
//! ## Commands
//!
//! - `gopilot serve` - Run the orchestrator HTTP service
//! - `gopilot orchestrate <query>` - Submit a task and print the answer
//! - `gopilot containers list|stop` - Inspect and stop workspace containers
//! - `gopilot health` - Check a running orchestrator
//!
//! Exit codes: 0 on success, 1 on error, 130 when interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use gopilot::client::OrchestratorClient;
use gopilot::commands::{self, ContainersCommand, OrchestrateArgs};
use gopilot::server::{self, ServeArgs};

const EXIT_INTERRUPTED: u8 = 130;

/// gopilot - route coding tasks to isolated workspace containers
#[derive(Parser)]
#[command(name = "gopilot")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "GOPILOT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Orchestrator base URL used by client commands
    #[arg(long, global = true, env = "GOPILOT_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Bearer token for an orchestrator that requires JWT auth
    #[arg(long, global = true, env = "GOPILOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GOPILOT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, env = "GOPILOT_LOG_FORMAT", default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator HTTP service
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Submit a task to a running orchestrator
    #[command(name = "orchestrate")]
    Orchestrate(OrchestrateArgs),

    /// Workspace container management
    #[command(name = "containers")]
    Containers {
        #[command(subcommand)]
        command: ContainersCommand,
    },

    /// Check orchestrator health
    #[command(name = "health")]
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level, cli.log_format) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Serve(args) => server::serve(cli.config, args).await,
        command => {
            tokio::select! {
                result = run_client(command, &cli.url, cli.token) => result,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("{}", "Interrupted".yellow());
                    return ExitCode::from(EXIT_INTERRUPTED);
                }
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run_client(command: Commands, url: &str, token: Option<String>) -> Result<()> {
    let client = OrchestratorClient::new(url, token)?;
    match command {
        Commands::Orchestrate(args) => commands::orchestrate::handle_command(args, &client).await,
        Commands::Containers { command } => commands::containers::handle_command(command, &client).await,
        Commands::Health => commands::health::handle_command(&client).await,
        Commands::Serve(_) => anyhow::bail!("serve is not a client command"),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init(),
    }

    Ok(())
}
