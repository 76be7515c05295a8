// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Workspace tools
//!
//! `run_command`, `list_files`, `read_file` and `write_file`, all scoped to
//! the workspace root.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use crate::error::WorkerError;
use crate::path_sanitizer::resolve;
use crate::workspace::run_with_timeout;
use gopilot_core::domain::mcp::ToolDescriptor;

pub const RUN_COMMAND: &str = "run_command";
pub const LIST_FILES: &str = "list_files";
pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
    /// Seconds.
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(default = "current_dir")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    file_path: String,
    content: String,
}

fn current_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, WorkerError> {
    serde_json::from_value(arguments).map_err(|e| WorkerError::InvalidArguments(format!("{tool}: {e}")))
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    let tool = |name: &str, description: &str, input_schema: Value| ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
        server: String::new(),
    };
    vec![
        tool(
            RUN_COMMAND,
            "Execute a shell command in the workspace",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command line passed to sh -c"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds"}
                },
                "required": ["command"]
            }),
        ),
        tool(
            LIST_FILES,
            "List files in a workspace directory",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "Directory relative to the workspace", "default": "."}}
            }),
        ),
        tool(
            READ_FILE,
            "Read a file from the workspace",
            json!({
                "type": "object",
                "properties": {"file_path": {"type": "string"}},
                "required": ["file_path"]
            }),
        ),
        tool(
            WRITE_FILE,
            "Write content to a file in the workspace, creating parent directories",
            json!({
                "type": "object",
                "properties": {"file_path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["file_path", "content"]
            }),
        ),
    ]
}

pub struct WorkspaceTools {
    root: PathBuf,
    command_timeout: Duration,
}

impl WorkspaceTools {
    pub fn new(root: PathBuf, command_timeout: Duration) -> Self {
        Self { root, command_timeout }
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, WorkerError> {
        match name {
            RUN_COMMAND => {
                let args: RunCommandArgs = parse_args(name, arguments)?;
                let limit = args.timeout.map(Duration::from_secs).unwrap_or(self.command_timeout);
                self.run_command(&args.command, limit).await
            }
            LIST_FILES => {
                let args: ListFilesArgs = parse_args(name, arguments)?;
                Ok(json!(self.list_files(&args.path).await?))
            }
            READ_FILE => {
                let args: ReadFileArgs = parse_args(name, arguments)?;
                self.read_file(&args.file_path).await
            }
            WRITE_FILE => {
                let args: WriteFileArgs = parse_args(name, arguments)?;
                self.write_file(&args.file_path, &args.content).await
            }
            other => Err(WorkerError::UnknownTool(other.to_string())),
        }
    }

    pub async fn run_command(&self, command: &str, limit: Duration) -> Result<Value, WorkerError> {
        info!(command, "Running command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.root);

        let output = run_with_timeout(cmd, limit).await?;
        Ok(json!({
            "returncode": output.status.code().unwrap_or(-1),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }

    pub async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>, WorkerError> {
        let target = resolve(&self.root, path)?;
        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|_| WorkerError::NotFound(path.to_string()))?;

        if metadata.is_file() {
            let name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(vec![FileEntry {
                name,
                kind: "file",
                size: Some(metadata.len()),
            }]);
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&target).await?;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if metadata.is_dir() { "directory" } else { "file" },
                size: metadata.is_file().then(|| metadata.len()),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn read_file(&self, file_path: &str) -> Result<Value, WorkerError> {
        let target = resolve(&self.root, file_path)?;
        if !target.is_file() {
            return Err(WorkerError::NotFound(file_path.to_string()));
        }
        let content = tokio::fs::read_to_string(&target).await?;
        Ok(json!({
            "file_path": file_path,
            "size": content.len(),
            "content": content,
        }))
    }

    pub async fn write_file(&self, file_path: &str, content: &str) -> Result<Value, WorkerError> {
        let target = resolve(&self.root, file_path)?;
        if target == self.root {
            return Err(WorkerError::InvalidPath(file_path.to_string()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        info!(file_path, bytes = content.len(), "Wrote file");
        Ok(json!({"file_path": file_path, "size": content.len()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(dir: &tempfile::TempDir) -> WorkspaceTools {
        WorkspaceTools::new(dir.path().to_path_buf(), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir);

        let written = tools
            .call(WRITE_FILE, json!({"file_path": "src/app.py", "content": "print('hi')\n"}))
            .await
            .unwrap();
        assert_eq!(written["size"], 12);
        assert!(dir.path().join("src/app.py").is_file());

        let read = tools.call(READ_FILE, json!({"file_path": "src/app.py"})).await.unwrap();
        assert_eq!(read["content"], "print('hi')\n");
        assert_eq!(read["file_path"], "src/app.py");
    }

    #[tokio::test]
    async fn test_list_files_sorted_with_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();

        let entries = tools(&dir).list_files(".").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
        assert_eq!(entries[1].size, Some(2));
        assert_eq!(entries[2].kind, "directory");
        assert_eq!(entries[2].size, None);
    }

    #[tokio::test]
    async fn test_list_single_file_and_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi").unwrap();
        let tools = tools(&dir);

        let entries = tools.list_files("README.md").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "README.md");

        assert!(matches!(tools.list_files("nope").await, Err(WorkerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir);

        for args in [
            json!({"file_path": "../outside.txt", "content": "x"}),
            json!({"file_path": "/etc/passwd", "content": "x"}),
        ] {
            assert!(matches!(tools.call(WRITE_FILE, args).await, Err(WorkerError::PathTraversal(_))));
        }
        assert!(matches!(
            tools.call(READ_FILE, json!({"file_path": "../../etc/passwd"})).await,
            Err(WorkerError::PathTraversal(_))
        ));
    }

    #[tokio::test]
    async fn test_run_command_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();

        let result = tools(&dir)
            .call(RUN_COMMAND, json!({"command": "ls && echo oops >&2 && exit 3"}))
            .await
            .unwrap();
        assert_eq!(result["returncode"], 3);
        assert!(result["stdout"].as_str().unwrap().contains("marker"));
        assert_eq!(result["stderr"], "oops\n");
    }

    #[tokio::test]
    async fn test_run_command_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = tools(&dir).call(RUN_COMMAND, json!({"command": "sleep 5", "timeout": 1})).await;
        assert!(matches!(result, Err(WorkerError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_bad_arguments_and_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir);
        assert!(matches!(tools.call(READ_FILE, json!({})).await, Err(WorkerError::InvalidArguments(_))));
        assert!(matches!(tools.call("rm_rf", json!({})).await, Err(WorkerError::UnknownTool(_))));
    }

    #[test]
    fn test_descriptors_cover_every_tool() {
        let names: Vec<String> = descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![RUN_COMMAND, LIST_FILES, READ_FILE, WRITE_FILE]);
    }
}
