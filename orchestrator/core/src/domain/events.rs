// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::task::TaskId;
use crate::domain::workspace::WorkspaceId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ContainerEvent {
    ContainerStarted {
        workspace_id: WorkspaceId,
        container_id: String,
        created: bool,
        started_at: DateTime<Utc>,
    },
    ContainerReused {
        workspace_id: WorkspaceId,
        container_id: String,
        reused_at: DateTime<Utc>,
    },
    ContainerIdle {
        workspace_id: WorkspaceId,
        idle_since: DateTime<Utc>,
    },
    ContainerStopped {
        workspace_id: WorkspaceId,
        container_id: String,
        reaped: bool,
        stopped_at: DateTime<Utc>,
    },
    ContainerStartFailed {
        workspace_id: WorkspaceId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskAccepted {
        task_id: TaskId,
        workspace_id: WorkspaceId,
        accepted_at: DateTime<Utc>,
    },
    ToolDispatched {
        task_id: TaskId,
        call_id: String,
        tool: String,
        server: String,
        is_error: bool,
        duration_ms: u64,
    },
    TaskCompleted {
        task_id: TaskId,
        workspace_id: WorkspaceId,
        rounds: u32,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        workspace_id: Option<WorkspaceId>,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}
