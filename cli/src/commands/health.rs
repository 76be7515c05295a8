// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use colored::Colorize;
use serde_json::Value;

use crate::client::OrchestratorClient;

pub async fn handle_command(client: &OrchestratorClient) -> Result<()> {
    let (status, body) = client.health().await?;
    let docker = body.get("docker").and_then(Value::as_str).unwrap_or("unknown");
    let uptime = body.get("uptime_seconds").and_then(Value::as_u64).unwrap_or(0);

    if status.is_success() {
        println!("{}", format!("✓ Orchestrator at {} is healthy", client.base_url()).green());
        println!("  Uptime: {}", format_duration(uptime));
        println!("  Docker: {}", docker);
        Ok(())
    } else {
        println!("{}", format!("✗ Orchestrator at {} is unhealthy", client.base_url()).red());
        println!("  Docker: {}", docker);
        anyhow::bail!("health check returned {}", status)
    }
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }
}
