// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Workspace
//!
//! Prepares `/workspace` inside the container: clones the repository once and
//! installs its dependencies. Initialisation runs at most once per process;
//! a failed attempt is retried on the next call.

use parking_lot::Mutex;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use gopilot_core::domain::workspace::{WorkspaceReadiness, WorkspaceStatus};

/// Run `command` to completion, killing it when `limit` passes.
pub(crate) async fn run_with_timeout(mut command: Command, limit: Duration) -> Result<Output, WorkerError> {
    command.stdin(Stdio::null()).kill_on_drop(true);
    match tokio::time::timeout(limit, command.output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(WorkerError::Timeout(limit.as_secs())),
    }
}

/// Marker file, program and arguments of each install step.
const INSTALL_STEPS: &[(&str, &str, &[&str])] = &[
    ("requirements.txt", "pip", &["install", "-r", "requirements.txt"]),
    ("pyproject.toml", "pip", &["install", "-e", "."]),
    ("package.json", "npm", &["install"]),
];

pub struct Workspace {
    config: WorkerConfig,
    ready: OnceCell<()>,
    /// Error of the last failed attempt; cleared when a new attempt starts.
    last_error: Mutex<Option<String>>,
}

impl Workspace {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            ready: OnceCell::new(),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.workspace_path
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.initialized()
    }

    /// Readiness as reported on `/health`.
    pub fn status(&self) -> WorkspaceStatus {
        if self.is_initialized() {
            return WorkspaceStatus {
                state: WorkspaceReadiness::Ready,
                error: None,
            };
        }
        match self.last_error.lock().clone() {
            Some(error) => WorkspaceStatus {
                state: WorkspaceReadiness::Failed,
                error: Some(error),
            },
            None => WorkspaceStatus::default(),
        }
    }

    pub async fn ensure_initialized(&self) -> Result<(), WorkerError> {
        self.ready
            .get_or_try_init(|| async {
                *self.last_error.lock() = None;
                let outcome = self.initialize().await;
                if let Err(e) = &outcome {
                    *self.last_error.lock() = Some(e.to_string());
                }
                outcome
            })
            .await
            .map(|_| ())
    }

    async fn initialize(&self) -> Result<(), WorkerError> {
        let root = self.root();
        tokio::fs::create_dir_all(root).await?;

        if let Some(repo_url) = &self.config.repo_url {
            if root.join(".git").exists() {
                info!(path = %root.display(), "Repository already present");
            } else {
                self.clone_repository(repo_url).await?;
            }
        }

        self.install_dependencies().await;
        info!(workspace_id = %self.config.workspace_id, "Workspace initialized");
        Ok(())
    }

    async fn clone_repository(&self, repo_url: &str) -> Result<(), WorkerError> {
        info!(repo_url, "Cloning repository");
        let mut command = Command::new("git");
        command.arg("clone").arg("--").arg(repo_url).arg(self.root());

        let output = run_with_timeout(command, self.config.clone_timeout)
            .await
            .map_err(|e| WorkerError::Init(format!("git clone {repo_url}: {e}")))?;
        if !output.status.success() {
            return Err(WorkerError::Init(format!(
                "git clone {repo_url} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!("Repository cloned successfully");
        Ok(())
    }

    /// Install failures are logged and ignored.
    async fn install_dependencies(&self) {
        let root = self.root();
        for (marker, program, args) in INSTALL_STEPS {
            if !root.join(marker).exists() {
                continue;
            }
            info!(marker, program, "Installing dependencies");
            let mut command = Command::new(program);
            command.args(*args).current_dir(root);

            match run_with_timeout(command, self.config.install_timeout).await {
                Ok(output) if output.status.success() => info!(marker, "Dependencies installed"),
                Ok(output) => warn!(
                    marker,
                    code = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Dependency install failed"
                ),
                Err(e) => warn!(marker, error = %e, "Dependency install failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(path: PathBuf) -> WorkerConfig {
        WorkerConfig {
            workspace_path: path,
            ..WorkerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_without_repo_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ws");
        let workspace = Workspace::new(config(root.clone()));

        assert!(!workspace.is_initialized());
        workspace.ensure_initialized().await.unwrap();
        assert!(root.is_dir());
        assert!(workspace.is_initialized());
        assert_eq!(workspace.status().state, WorkspaceReadiness::Ready);

        // Second call is a no-op.
        workspace.ensure_initialized().await.unwrap();
    }

    #[tokio::test]
    async fn test_clone_failure_is_fatal_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().join("ws"));
        cfg.repo_url = Some(dir.path().join("missing-repo").display().to_string());
        cfg.clone_timeout = Duration::from_secs(30);
        let workspace = Workspace::new(cfg);

        assert_eq!(workspace.status().state, WorkspaceReadiness::Initializing);
        assert!(matches!(workspace.ensure_initialized().await, Err(WorkerError::Init(_))));
        assert!(!workspace.is_initialized());

        let status = workspace.status();
        assert_eq!(status.state, WorkspaceReadiness::Failed);
        assert!(status.error.unwrap().contains("git clone"));
    }

    #[tokio::test]
    async fn test_option_like_repo_url_is_not_an_option() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("pwned");
        let mut cfg = config(dir.path().join("ws"));
        cfg.repo_url = Some(format!("--upload-pack=touch {}", marker.display()));
        cfg.clone_timeout = Duration::from_secs(30);

        assert!(matches!(Workspace::new(cfg).ensure_initialized().await, Err(WorkerError::Init(_))));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_existing_checkout_is_not_cloned_again() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let mut cfg = config(dir.path().to_path_buf());
        cfg.repo_url = Some("https://invalid.example/repo.git".into());

        Workspace::new(cfg).ensure_initialized().await.unwrap();
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 5");
        let err = run_with_timeout(command, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(_)));
    }
}
