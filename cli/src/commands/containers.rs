// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! Workspace container management
//!
//! Commands: list, stop

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use gopilot_core::domain::container::{ContainerRecord, ContainerStatus};

use crate::client::OrchestratorClient;

#[derive(Subcommand)]
pub enum ContainersCommand {
    /// List workspace containers
    List {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop the container of a workspace
    Stop {
        /// Workspace ID
        #[arg(value_name = "WORKSPACE_ID")]
        workspace_id: String,
    },
}

pub async fn handle_command(command: ContainersCommand, client: &OrchestratorClient) -> Result<()> {
    match command {
        ContainersCommand::List { json } => list(client, json).await,
        ContainersCommand::Stop { workspace_id } => stop(client, &workspace_id).await,
    }
}

async fn list(client: &OrchestratorClient, json: bool) -> Result<()> {
    let containers = client.list_containers().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
        return Ok(());
    }
    if containers.is_empty() {
        println!("{}", "No workspace containers".yellow());
        return Ok(());
    }

    println!(
        "{:<28} {:<10} {:<6} {:<14} {}",
        "WORKSPACE".bold(),
        "STATUS".bold(),
        "TASKS".bold(),
        "CONTAINER".bold(),
        "LAST USED".bold()
    );
    for record in &containers {
        println!(
            "{:<28} {:<10} {:<6} {:<14} {}",
            record.workspace_id.as_str(),
            status_label(record),
            record.active_tasks,
            short_id(&record.container_id),
            record.last_used_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn stop(client: &OrchestratorClient, workspace_id: &str) -> Result<()> {
    let record = client.stop_container(workspace_id).await?;
    println!(
        "{}",
        format!("✓ Stopped {} ({})", record.container_name, short_id(&record.container_id)).green()
    );
    Ok(())
}

fn status_label(record: &ContainerRecord) -> colored::ColoredString {
    let label = record.status.to_string();
    match record.status {
        ContainerStatus::Running => label.green(),
        ContainerStatus::Idle => label.cyan(),
        ContainerStatus::Starting => label.yellow(),
        ContainerStatus::Stopped => label.dimmed(),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
