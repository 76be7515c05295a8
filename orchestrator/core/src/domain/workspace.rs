// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Workspace
//!
//! A workspace is the logical execution context bound to one repository and
//! backed by at most one container. Its identifier doubles as the container
//! and volume name suffix, so it must stay Docker-safe.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Workspace identity and derivation from repository references

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Identifier used when a task carries neither a repository nor an explicit workspace.
pub const DEFAULT_WORKSPACE: &str = "default";

const MAX_WORKSPACE_ID_LEN: usize = 63;
const DIGEST_PREFIX_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkspaceIdError {
    #[error("workspace id cannot be empty")]
    Empty,
    #[error("workspace id '{0}' exceeds {MAX_WORKSPACE_ID_LEN} characters")]
    TooLong(String),
    #[error("workspace id '{0}' must start with an alphanumeric character and contain only [a-zA-Z0-9_.-]")]
    InvalidCharacters(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Validate an explicit identifier supplied by a caller.
    pub fn parse(raw: &str) -> Result<Self, WorkspaceIdError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(WorkspaceIdError::Empty);
        }
        if raw.len() > MAX_WORKSPACE_ID_LEN {
            return Err(WorkspaceIdError::TooLong(raw.to_string()));
        }

        let mut chars = raw.chars();
        let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
        let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !first_ok || !rest_ok {
            return Err(WorkspaceIdError::InvalidCharacters(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    /// Derive a stable identifier from a repository URL.
    ///
    /// Equivalent spellings of the same repository (trailing slash, `.git`
    /// suffix, host casing) map to the same workspace.
    pub fn from_repo_url(repo_url: &str) -> Self {
        let normalized = normalize_repo_url(repo_url);
        let digest = Sha256::digest(normalized.as_bytes());
        let hex = hex::encode(digest);
        Self(format!("repo-{}", &hex[..DIGEST_PREFIX_LEN]))
    }

    pub fn default_workspace() -> Self {
        Self(DEFAULT_WORKSPACE.to_string())
    }

    /// Resolve the workspace for a task: explicit id, then repository, then default.
    pub fn resolve(
        explicit: Option<&str>,
        repo_url: Option<&str>,
    ) -> Result<Self, WorkspaceIdError> {
        if let Some(id) = explicit.filter(|s| !s.trim().is_empty()) {
            return Self::parse(id);
        }
        match repo_url.map(str::trim).filter(|s| !s.is_empty()) {
            Some(url) => Ok(Self::from_repo_url(url)),
            None => Ok(Self::default_workspace()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Docker container name for this workspace.
    pub fn container_name(&self) -> String {
        format!("gopilot-{}", self.0)
    }

    /// Docker named volume holding the workspace checkout.
    pub fn volume_name(&self) -> String {
        format!("gopilot-ws-{}", self.0)
    }
}

/// Preparation state of a workspace checkout, reported by its worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceReadiness {
    #[default]
    Initializing,
    Ready,
    Failed,
}

/// `workspace` section of the worker's `/health` body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceStatus {
    pub state: WorkspaceReadiness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TryFrom<String> for WorkspaceId {
    type Error = WorkspaceIdError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<WorkspaceId> for String {
    fn from(id: WorkspaceId) -> Self {
        id.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form of a repository reference used for hashing.
pub fn normalize_repo_url(repo_url: &str) -> String {
    let mut url = repo_url.trim().to_string();

    while url.ends_with('/') {
        url.pop();
    }
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped.to_string();
    }

    // Lowercase scheme and authority; paths stay case-sensitive.
    match url.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            let authority_end = url[authority_start..]
                .find('/')
                .map(|i| authority_start + i)
                .unwrap_or(url.len());
            format!(
                "{}{}",
                url[..authority_end].to_lowercase(),
                &url[authority_end..]
            )
        }
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_url_derivation_is_stable() {
        let a = WorkspaceId::from_repo_url("https://github.com/example/repo");
        let b = WorkspaceId::from_repo_url("https://github.com/example/repo");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("repo-"));
        assert_eq!(a.as_str().len(), "repo-".len() + 12);
    }

    #[test]
    fn test_equivalent_spellings_share_workspace() {
        let canonical = WorkspaceId::from_repo_url("https://github.com/example/repo");
        for variant in [
            "https://github.com/example/repo/",
            "https://github.com/example/repo.git",
            "  https://GitHub.com/example/repo  ",
        ] {
            assert_eq!(WorkspaceId::from_repo_url(variant), canonical, "variant {variant}");
        }
    }

    #[test]
    fn test_path_case_is_significant() {
        let lower = WorkspaceId::from_repo_url("https://github.com/example/repo");
        let upper = WorkspaceId::from_repo_url("https://github.com/Example/Repo");
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_resolve_precedence() {
        let explicit = WorkspaceId::resolve(Some("my-ws"), Some("https://github.com/a/b")).unwrap();
        assert_eq!(explicit.as_str(), "my-ws");

        let derived = WorkspaceId::resolve(None, Some("https://github.com/a/b")).unwrap();
        assert!(derived.as_str().starts_with("repo-"));

        let fallback = WorkspaceId::resolve(Some("  "), Some("")).unwrap();
        assert_eq!(fallback.as_str(), DEFAULT_WORKSPACE);
    }

    #[test]
    fn test_parse_rejects_unsafe_ids() {
        assert_eq!(WorkspaceId::parse(""), Err(WorkspaceIdError::Empty));
        assert!(matches!(WorkspaceId::parse("-leading"), Err(WorkspaceIdError::InvalidCharacters(_))));
        assert!(matches!(WorkspaceId::parse("a/b"), Err(WorkspaceIdError::InvalidCharacters(_))));
        assert!(matches!(WorkspaceId::parse(&"a".repeat(64)), Err(WorkspaceIdError::TooLong(_))));
        assert!(WorkspaceId::parse("repo-1a2b.dev_x").is_ok());
    }

    #[test]
    fn test_container_and_volume_names() {
        let ws = WorkspaceId::parse("demo").unwrap();
        assert_eq!(ws.container_name(), "gopilot-demo");
        assert_eq!(ws.volume_name(), "gopilot-ws-demo");
    }

    #[test]
    fn test_deserialization_validates() {
        let id: WorkspaceId = serde_json::from_str("\"my-ws\"").unwrap();
        assert_eq!(id.as_str(), "my-ws");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"my-ws\"");

        assert!(serde_json::from_str::<WorkspaceId>("\"../etc\"").is_err());
        assert!(serde_json::from_str::<WorkspaceId>("\"\"").is_err());
    }
}
