// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Mcp
//!
//! Wire types for the Model Context Protocol subset spoken between the
//! orchestrator, the workspace worker and external tool servers: JSON-RPC 2.0
//! envelopes plus the `initialize`, `tools/list` and `tools/call` payloads.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Tool protocol value objects shared by dispatcher and worker

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

// JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.to_string(),
            params: Some(params),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A callable operation advertised by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
    /// Owning server; filled in by the dispatcher, never sent on the wire.
    #[serde(skip)]
    pub server: String,
}

pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Sub-task identifier, echoed back in the matching result.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Output of one tool call, tagged with the tool and the sub-task it answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub server: String,
    pub output: Value,
    pub is_error: bool,
    pub duration_ms: u64,
}

impl ToolResult {
    /// Text form handed back to the model as a `tool` message.
    pub fn to_model_content(&self) -> String {
        match &self.output {
            Value::String(s) if !self.is_error => s.clone(),
            Value::String(s) => format!("error: {s}"),
            other if self.is_error => format!("error: {other}"),
            other => other.to_string(),
        }
    }
}

/// Result payload of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn from_value(value: Value, is_error: bool) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            content: vec![ContentBlock::Text { text }],
            is_error,
            structured_content: match value {
                Value::Object(_) => Some(value),
                _ => None,
            },
        }
    }

    /// Collapse the result into a single JSON value.
    pub fn into_value(self) -> Value {
        if let Some(structured) = self.structured_content {
            return structured;
        }
        let text: Vec<String> = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();
        let joined = text.join("\n");
        serde_json::from_str(&joined).unwrap_or(Value::String(joined))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolTransport {
    /// MCP JSON-RPC 2.0 over HTTP POST.
    #[default]
    Mcp,
    /// genai-toolbox REST dialect (`/api/toolset`, `/api/tool/{name}/invoke`).
    Toolbox,
}

/// An external tool server the dispatcher may route to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub transport: ToolTransport,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Unknown tool server: {0}")]
    UnknownServer(String),
    #[error("Invalid tool server: {0}")]
    InvalidServer(String),
    #[error("Tool server already attached: {0}")]
    ServerExists(String),
    #[error("Workspace worker not ready: {0}")]
    WorkerNotReady(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Tool call timed out after {0}s")]
    Timeout(u64),
    #[error("JSON-RPC error {code}: {message}")]
    Protocol { code: i32, message: String },
    #[error("{0}")]
    ToolFailed(String),
}

/// Client for one tool server, whatever its wire dialect.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Handshake; also used as a readiness check.
    async fn initialize(&self) -> Result<(), DispatchError>;
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, DispatchError>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, DispatchError>;
}
