// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! Worker configuration, read from the container environment the
//! orchestrator sets up.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::WorkerError;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workspace_id: String,
    pub repo_url: Option<String>,
    pub workspace_path: PathBuf,
    pub port: u16,
    /// Default limit for `run_command` when the call gives none.
    pub command_timeout: Duration,
    /// Limit for each dependency install step.
    pub install_timeout: Duration,
    pub clone_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workspace_id: "default".to_string(),
            repo_url: None,
            workspace_path: PathBuf::from("/workspace"),
            port: 8081,
            command_timeout: Duration::from_secs(300),
            install_timeout: Duration::from_secs(600),
            clone_timeout: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(id) = get("WORKSPACE_ID") {
            config.workspace_id = id;
        }
        config.repo_url = get("REPO_URL");
        if let Some(path) = get("WORKSPACE_PATH") {
            config.workspace_path = PathBuf::from(path);
        }
        if let Some(port) = get("GOPILOT_WORKER_PORT") {
            config.port = port
                .parse()
                .map_err(|_| WorkerError::Config(format!("GOPILOT_WORKER_PORT is not a port: {port}")))?;
        }
        if let Some(secs) = get("GOPILOT_COMMAND_TIMEOUT") {
            config.command_timeout = parse_secs("GOPILOT_COMMAND_TIMEOUT", &secs)?;
        }
        if let Some(secs) = get("GOPILOT_INSTALL_TIMEOUT") {
            config.install_timeout = parse_secs("GOPILOT_INSTALL_TIMEOUT", &secs)?;
        }
        Ok(config)
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, WorkerError> {
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(WorkerError::Config(format!(
            "{key} must be a positive number of seconds, got {raw}"
        ))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.workspace_id, "default");
        assert_eq!(config.workspace_path, PathBuf::from("/workspace"));
        assert_eq!(config.port, 8081);
        assert!(config.repo_url.is_none());
        assert_eq!(config.command_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_env_values() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("WORKSPACE_ID", "repo-abc"),
            ("REPO_URL", "https://github.com/a/b"),
            ("WORKSPACE_PATH", "/tmp/ws"),
            ("GOPILOT_WORKER_PORT", "9000"),
            ("GOPILOT_COMMAND_TIMEOUT", "30"),
        ]))
        .unwrap();
        assert_eq!(config.workspace_id, "repo-abc");
        assert_eq!(config.repo_url.as_deref(), Some("https://github.com/a/b"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_blank_repo_url_is_none() {
        let config = WorkerConfig::from_lookup(lookup(&[("REPO_URL", "  ")])).unwrap();
        assert!(config.repo_url.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(WorkerConfig::from_lookup(lookup(&[("GOPILOT_WORKER_PORT", "http")])).is_err());
        assert!(WorkerConfig::from_lookup(lookup(&[("GOPILOT_INSTALL_TIMEOUT", "0")])).is_err());
    }
}
