// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use gopilot_core::domain::task::{OrchestrationResult, TaskRequest};

use crate::client::OrchestratorClient;

#[derive(Debug, Args)]
pub struct OrchestrateArgs {
    /// Natural-language task
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Repository to work on
    #[arg(long, value_name = "URL")]
    pub repo_url: Option<String>,

    /// File to reference in the task (repeatable)
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<String>,

    /// Explicit workspace ID (defaults to one derived from the repository)
    #[arg(long, value_name = "ID")]
    pub workspace_id: Option<String>,

    /// Print the raw JSON result
    #[arg(long)]
    pub json: bool,
}

impl OrchestrateArgs {
    pub fn to_request(&self) -> TaskRequest {
        TaskRequest {
            query: self.query.clone(),
            repo_url: self.repo_url.clone(),
            files: self.files.clone(),
            workspace_id: self.workspace_id.clone(),
        }
    }
}

pub async fn handle_command(args: OrchestrateArgs, client: &OrchestratorClient) -> Result<()> {
    let result = client.orchestrate(&args.to_request()).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &OrchestrationResult) {
    println!(
        "{} {} {}",
        "Workspace:".bold(),
        result.workspace_id.as_str(),
        format!("(task {}, {} round(s))", result.task_id, result.rounds).dimmed()
    );

    for tool in &result.tool_results {
        let marker = if tool.is_error { "✗".red() } else { "✓".green() };
        let server = if tool.server.is_empty() { "?" } else { tool.server.as_str() };
        println!("  {} {} [{}] {}ms", marker, tool.tool, server, tool.duration_ms);
    }

    println!();
    println!("{}", result.response);
    println!();
    println!(
        "{}",
        format!(
            "tokens: {} prompt + {} completion = {}",
            result.usage.prompt_tokens, result.usage.completion_tokens, result.usage.total_tokens
        )
        .dimmed()
    );
}
