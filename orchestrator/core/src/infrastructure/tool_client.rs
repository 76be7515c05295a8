// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// Tool server clients
//
// Two wire dialects behind the `ToolClient` seam:
// - MCP: JSON-RPC 2.0 over HTTP POST (workspace worker, most tool servers)
// - Toolbox: the genai-toolbox REST API (`/api/toolset`, `/api/tool/{name}/invoke`)

use crate::domain::config::is_loopback;
use crate::domain::mcp::{
    CallToolResult, DispatchError, JsonRpcRequest, JsonRpcResponse, ToolClient, ToolDescriptor,
    ToolServerConfig, ToolTransport, MCP_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

fn transport_error(e: reqwest::Error) -> DispatchError {
    DispatchError::Transport(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DispatchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(DispatchError::Transport(format!("HTTP {}: {}", status, body)))
}

/// Reject malformed URLs and, unless allowed, loopback hosts.
pub fn ensure_upstream_allowed(raw: &str, allow_loopback: bool) -> Result<(), DispatchError> {
    let parsed = url::Url::parse(raw).map_err(|e| DispatchError::Transport(format!("invalid URL '{}': {}", raw, e)))?;
    if !allow_loopback && is_loopback(&parsed) {
        return Err(DispatchError::Transport(format!("loopback upstream not allowed: {}", raw)));
    }
    Ok(())
}

/// Build the client for a configured tool server.
pub fn client_for(
    http: reqwest::Client,
    server: &ToolServerConfig,
    allow_loopback: bool,
) -> Result<Arc<dyn ToolClient>, DispatchError> {
    ensure_upstream_allowed(&server.url, allow_loopback)?;
    Ok(match server.transport {
        ToolTransport::Mcp => Arc::new(McpHttpClient::new(http, server.url.clone())),
        ToolTransport::Toolbox => Arc::new(ToolboxClient::new(http, server.url.clone())),
    })
}

pub struct McpHttpClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl McpHttpClient {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self {
            http,
            url,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, DispatchError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        debug!(url = %self.url, method, id, "MCP request");

        let response = self
            .http
            .post(&self.url)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let envelope: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("invalid JSON-RPC response: {}", e)))?;

        if let Some(error) = envelope.error {
            return Err(DispatchError::Protocol {
                code: error.code,
                message: error.message,
            });
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

#[async_trait]
impl ToolClient for McpHttpClient {
    async fn initialize(&self) -> Result<(), DispatchError> {
        self.rpc(
            METHOD_INITIALIZE,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "gopilot-orchestrator", "version": env!("CARGO_PKG_VERSION")}
            }),
        )
        .await?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, DispatchError> {
        let result = self.rpc(METHOD_TOOLS_LIST, json!({})).await?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| DispatchError::Transport(format!("invalid tools/list result: {}", e)))?;
        Ok(list.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, DispatchError> {
        let result = self
            .rpc(METHOD_TOOLS_CALL, json!({"name": name, "arguments": arguments}))
            .await?;
        let call: CallToolResult = serde_json::from_value(result)
            .map_err(|e| DispatchError::Transport(format!("invalid tools/call result: {}", e)))?;

        let is_error = call.is_error;
        let value = call.into_value();
        if is_error {
            let message = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(DispatchError::ToolFailed(message));
        }
        Ok(value)
    }
}

pub struct ToolboxClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ToolsetManifest {
    #[serde(default)]
    tools: BTreeMap<String, ToolboxTool>,
}

#[derive(Deserialize)]
struct ToolboxTool {
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<ToolboxParameter>,
}

#[derive(Deserialize)]
struct ToolboxParameter {
    name: String,
    #[serde(rename = "type", default = "default_param_type")]
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_true")]
    required: bool,
}

fn default_param_type() -> String {
    "string".to_string()
}

fn default_true() -> bool {
    true
}

impl ToolboxTool {
    fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({"type": param.kind, "description": param.description}),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({"type": "object", "properties": properties, "required": required})
    }
}

impl ToolboxClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn manifest(&self) -> Result<ToolsetManifest, DispatchError> {
        let response = self
            .http
            .get(format!("{}/api/toolset", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("invalid toolset manifest: {}", e)))
    }
}

#[async_trait]
impl ToolClient for ToolboxClient {
    async fn initialize(&self) -> Result<(), DispatchError> {
        self.manifest().await.map(|_| ())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, DispatchError> {
        Ok(self
            .manifest()
            .await?
            .tools
            .into_iter()
            .map(|(name, tool)| ToolDescriptor {
                input_schema: tool.input_schema(),
                description: tool.description,
                name,
                server: String::new(),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, DispatchError> {
        let response = self
            .http
            .post(format!("{}/api/tool/{}/invoke", self.base_url, name))
            .json(&arguments)
            .send()
            .await
            .map_err(transport_error)?;
        let body: Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("invalid toolbox response: {}", e)))?;

        // Toolbox wraps output as {"result": "<json text>"}.
        Ok(match body {
            Value::Object(mut obj) if obj.contains_key("result") => match obj.remove("result") {
                Some(Value::String(text)) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                Some(other) => other,
                None => Value::Null,
            },
            other => other,
        })
    }
}
