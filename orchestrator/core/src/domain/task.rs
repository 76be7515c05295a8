// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::llm::TokenUsage;
use crate::domain::mcp::ToolResult;
use crate::domain::workspace::WorkspaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A natural-language task bound to an optional repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub query: String,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

impl TaskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            repo_url: None,
            files: Vec::new(),
            workspace_id: None,
        }
    }

    pub fn with_repo(mut self, repo_url: impl Into<String>) -> Self {
        self.repo_url = Some(repo_url.into());
        self
    }

    /// The trimmed repository URL, if one was given.
    ///
    /// The URL ends up as a `git clone` argument inside the container, so
    /// values git would read as an option or that carry whitespace or control
    /// characters are rejected.
    pub fn repository(&self) -> Result<Option<&str>, String> {
        let Some(url) = self.repo_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        if url.starts_with('-') {
            return Err(format!("repo_url must not start with '-': {url}"));
        }
        if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err("repo_url must not contain whitespace or control characters".to_string());
        }
        Ok(Some(url))
    }

    /// User turn sent to the model: the query plus any attached file references.
    pub fn prompt(&self) -> String {
        if self.files.is_empty() {
            return self.query.clone();
        }
        let listing = self
            .files
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n\nAttached files:\n{}", self.query, listing)
    }
}

/// Aggregated answer to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub task_id: TaskId,
    pub status: String,
    pub workspace_id: WorkspaceId,
    pub container_id: String,
    pub response: String,
    pub tool_results: Vec<ToolResult>,
    pub rounds: u32,
    pub usage: TokenUsage,
}
