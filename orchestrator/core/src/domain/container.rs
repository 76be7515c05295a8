// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::domain::workspace::WorkspaceId;

/// Label marking containers owned by this orchestrator.
pub const MANAGED_LABEL: &str = "gopilot.managed";
/// Label carrying the workspace identifier.
pub const WORKSPACE_LABEL: &str = "gopilot.workspace";
/// Label carrying the deployment region.
pub const REGION_LABEL: &str = "gopilot.region";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Being created or started.
    Starting,
    /// At least one task holds a lease.
    Running,
    /// Up, with no leases.
    Idle,
    /// Explicitly stopped or reaped.
    Stopped,
}

impl ContainerStatus {
    pub fn is_live(&self) -> bool {
        !matches!(self, ContainerStatus::Stopped)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Idle => "idle",
            ContainerStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<u32>,
}

impl ResourceLimits {
    /// Docker `nano_cpus`: 1 CPU = 1e9, so 1 milli-CPU = 1e6.
    pub fn nano_cpus(&self) -> Option<i64> {
        self.cpu_millis.map(|m| i64::from(m) * 1_000_000)
    }

    pub fn memory(&self) -> Option<i64> {
        self.memory_bytes.map(|b| i64::try_from(b).unwrap_or(i64::MAX))
    }
}

/// Orchestrator-side view of a workspace container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub workspace_id: WorkspaceId,
    pub container_id: String,
    pub container_name: String,
    /// Base URL of the workspace worker inside the container.
    pub endpoint: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    pub status: ContainerStatus,
    pub resources: ResourceLimits,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub active_tasks: u32,
}

/// Everything the runtime needs to create a workspace container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub resources: ResourceLimits,
    pub network: Option<String>,
    /// `volume_or_host_path:container_path` binds.
    pub binds: Vec<String>,
    pub autopull: bool,
}

/// Runtime-side view of a container, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub labels: HashMap<String, String>,
}

impl RuntimeContainer {
    pub fn workspace_id(&self) -> Option<WorkspaceId> {
        self.labels
            .get(WORKSPACE_LABEL)
            .and_then(|id| WorkspaceId::parse(id).ok())
    }
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Failed to start container: {0}")]
    StartFailed(String),
    #[error("Failed to stop container: {0}")]
    StopFailed(String),
    #[error("No container for workspace: {0}")]
    NotFound(String),
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),
}

/// Container engine seam used by the lifecycle manager.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up a container by name. `Ok(None)` when it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeContainer>, ContainerError>;
    /// Create (without starting) a container; returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;
    async fn start(&self, id: &str) -> Result<(), ContainerError>;
    async fn stop(&self, id: &str) -> Result<(), ContainerError>;
    /// All containers carrying the managed label, running or not.
    async fn list_managed(&self) -> Result<Vec<RuntimeContainer>, ContainerError>;
    async fn ping(&self) -> Result<(), ContainerError>;
}
