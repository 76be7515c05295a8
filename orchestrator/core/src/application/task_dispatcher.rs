// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Task Dispatcher
//!
//! Routes model tool calls to the tool server that owns them. The workspace
//! worker of the current lease is always the first server (`workspace`);
//! configured external servers follow in configuration order.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Tool catalogue assembly, routing and result tagging

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::config::OrchestratorConfig;
use crate::domain::mcp::{DispatchError, ToolCall, ToolClient, ToolDescriptor, ToolResult, ToolServerConfig};
use crate::domain::workspace::{WorkspaceReadiness, WorkspaceStatus};
use crate::infrastructure::tool_client::{client_for, McpHttpClient};

/// Name of the implicit server backed by the workspace worker.
pub const WORKSPACE_SERVER: &str = "workspace";

/// Path of the worker's MCP endpoint.
pub const WORKER_MCP_PATH: &str = "/mcp";

/// Path of the worker's health endpoint, which also reports checkout readiness.
pub const WORKER_HEALTH_PATH: &str = "/health";

/// Added on top of a `timeout` argument a tool call carries itself.
const REQUESTED_TIMEOUT_MARGIN: Duration = Duration::from_secs(15);

/// Upper bound for a `timeout` argument.
const MAX_REQUESTED_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Limit for a single readiness attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

struct ToolServer {
    name: String,
    client: Arc<dyn ToolClient>,
}

#[derive(Debug, Deserialize)]
struct WorkerHealth {
    #[serde(default)]
    workspace: Option<WorkspaceStatus>,
}

pub struct TaskDispatcher {
    http: reqwest::Client,
    servers: RwLock<Vec<ToolServer>>,
    tool_timeout: Duration,
    workspace_timeout: Duration,
    allow_loopback: bool,
}

impl TaskDispatcher {
    pub fn new(http: reqwest::Client, tool_timeout: Duration) -> Self {
        Self {
            http,
            servers: RwLock::new(Vec::new()),
            tool_timeout,
            workspace_timeout: tool_timeout,
            allow_loopback: false,
        }
    }

    /// Per-call limit for the workspace worker's tools.
    pub fn with_workspace_timeout(mut self, timeout: Duration) -> Self {
        self.workspace_timeout = timeout;
        self
    }

    /// Allow servers attached at runtime to live on loopback addresses.
    pub fn with_loopback(mut self, allow: bool) -> Self {
        self.allow_loopback = allow;
        self
    }

    /// Build a dispatcher with every configured tool server.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, DispatchError> {
        // Calls are bounded per call; a client-wide timeout would cut long commands short.
        let http = reqwest::Client::builder()
            .connect_timeout(config.tools.timeout)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        let dispatcher = Self::new(http.clone(), config.tools.timeout)
            .with_workspace_timeout(config.tools.workspace_timeout)
            .with_loopback(config.allow_loopback_upstreams);
        for server in &config.tools.servers {
            let client = client_for(http.clone(), server, config.allow_loopback_upstreams)?;
            info!(server = %server.name, url = %server.url, transport = ?server.transport, "Registered tool server");
            dispatcher.register(server.name.clone(), client);
        }
        Ok(dispatcher)
    }

    /// Add an external server. Registration order decides name clashes.
    pub fn register(&self, name: impl Into<String>, client: Arc<dyn ToolClient>) {
        self.servers.write().push(ToolServer {
            name: name.into(),
            client,
        });
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.read().iter().map(|s| s.name.clone()).collect()
    }

    /// Register a tool server at runtime after checking it answers `tools/list`.
    ///
    /// Returns the server's tools. The server joins the catalogue of every
    /// task started afterwards, behind the servers already registered.
    pub async fn attach(&self, server: &ToolServerConfig) -> Result<Vec<ToolDescriptor>, DispatchError> {
        let name = server.name.trim();
        if name.is_empty() || server.url.trim().is_empty() {
            return Err(DispatchError::InvalidServer("name and url are required".to_string()));
        }
        if name == WORKSPACE_SERVER {
            return Err(DispatchError::InvalidServer(format!("'{name}' is reserved for the workspace worker")));
        }
        if self.servers.read().iter().any(|s| s.name == name) {
            return Err(DispatchError::ServerExists(name.to_string()));
        }

        let client = client_for(self.http.clone(), server, self.allow_loopback)
            .map_err(|e| DispatchError::InvalidServer(e.to_string()))?;
        let mut tools = match tokio::time::timeout(self.tool_timeout, client.list_tools()).await {
            Ok(listing) => listing?,
            Err(_) => return Err(DispatchError::Timeout(self.tool_timeout.as_secs())),
        };

        {
            let mut servers = self.servers.write();
            if servers.iter().any(|s| s.name == name) {
                return Err(DispatchError::ServerExists(name.to_string()));
            }
            servers.push(ToolServer {
                name: name.to_string(),
                client,
            });
        }

        for tool in &mut tools {
            tool.server = name.to_string();
        }
        info!(server = name, url = %server.url, tools = tools.len(), "Attached tool server");
        Ok(tools)
    }

    fn worker_client(&self, worker_endpoint: &str) -> Arc<dyn ToolClient> {
        Arc::new(McpHttpClient::new(
            self.http.clone(),
            format!("{}{}", worker_endpoint.trim_end_matches('/'), WORKER_MCP_PATH),
        ))
    }

    fn client(&self, server: &str, worker_endpoint: Option<&str>) -> Result<Arc<dyn ToolClient>, DispatchError> {
        if server == WORKSPACE_SERVER {
            return worker_endpoint
                .map(|endpoint| self.worker_client(endpoint))
                .ok_or_else(|| DispatchError::UnknownServer(server.to_string()));
        }
        self.servers
            .read()
            .iter()
            .find(|s| s.name == server)
            .map(|s| s.client.clone())
            .ok_or_else(|| DispatchError::UnknownServer(server.to_string()))
    }

    /// Poll the worker with MCP `initialize` until it answers or `timeout` passes.
    pub async fn wait_for_worker(&self, worker_endpoint: &str, timeout: Duration) -> Result<(), DispatchError> {
        let client = self.worker_client(worker_endpoint);
        let deadline = Instant::now() + timeout;
        let mut delay = Duration::from_millis(250);

        loop {
            let attempt = match tokio::time::timeout(ATTEMPT_TIMEOUT, client.initialize()).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(ATTEMPT_TIMEOUT.as_secs())),
            };
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) if Instant::now() + delay >= deadline => {
                    return Err(DispatchError::WorkerNotReady(format!(
                        "worker at {} not answering after {}s: {}",
                        worker_endpoint,
                        timeout.as_secs(),
                        e
                    )))
                }
                Err(e) => {
                    debug!(endpoint = worker_endpoint, error = %e, "Worker not ready yet");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
            }
        }
    }

    /// Wait until the worker reports its checkout as prepared.
    ///
    /// Workers whose health body carries no readiness are taken as ready.
    pub async fn wait_for_workspace(&self, worker_endpoint: &str, timeout: Duration) -> Result<(), DispatchError> {
        let url = format!("{}{}", worker_endpoint.trim_end_matches('/'), WORKER_HEALTH_PATH);
        let deadline = Instant::now() + timeout;
        let mut delay = Duration::from_millis(250);

        loop {
            let last = match self.workspace_status(&url).await {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => match status.state {
                    WorkspaceReadiness::Ready => return Ok(()),
                    WorkspaceReadiness::Failed => {
                        return Err(DispatchError::WorkerNotReady(format!(
                            "workspace initialization failed: {}",
                            status.error.unwrap_or_else(|| "unknown error".to_string())
                        )))
                    }
                    WorkspaceReadiness::Initializing => "workspace still initializing".to_string(),
                },
                Err(e) => e.to_string(),
            };
            if Instant::now() + delay >= deadline {
                return Err(DispatchError::WorkerNotReady(format!(
                    "{} after {}s",
                    last,
                    timeout.as_secs()
                )));
            }
            debug!(endpoint = worker_endpoint, status = %last, "Waiting for workspace");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(5));
        }
    }

    async fn workspace_status(&self, url: &str) -> Result<Option<WorkspaceStatus>, DispatchError> {
        let response = self
            .http
            .get(url)
            .timeout(ATTEMPT_TIMEOUT)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let health: WorkerHealth = response
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("invalid health body: {e}")))?;
        Ok(health.workspace)
    }

    /// Tools from the worker and every configured server, first server winning on name clashes.
    pub async fn catalogue(&self, worker_endpoint: Option<&str>) -> Vec<ToolDescriptor> {
        let mut sources: Vec<(String, Arc<dyn ToolClient>)> = Vec::new();
        if let Some(endpoint) = worker_endpoint {
            sources.push((WORKSPACE_SERVER.to_string(), self.worker_client(endpoint)));
        }
        sources.extend(self.servers.read().iter().map(|s| (s.name.clone(), s.client.clone())));

        let listings = join_all(sources.iter().map(|(_, client)| client.list_tools())).await;

        let mut seen = HashSet::new();
        let mut catalogue = Vec::new();
        for ((server, _), listing) in sources.iter().zip(listings) {
            let tools = match listing {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %server, error = %e, "Skipping tool server that failed to list tools");
                    continue;
                }
            };
            for mut tool in tools {
                if !seen.insert(tool.name.clone()) {
                    warn!(server = %server, tool = %tool.name, "Tool name already provided by an earlier server; ignoring");
                    continue;
                }
                tool.server = server.clone();
                catalogue.push(tool);
            }
        }
        debug!(tools = catalogue.len(), "Assembled tool catalogue");
        catalogue
    }

    /// Run one tool call. Failures come back as error results, never as `Err`.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        catalogue: &[ToolDescriptor],
        worker_endpoint: Option<&str>,
    ) -> ToolResult {
        let started = Instant::now();
        let server = catalogue
            .iter()
            .find(|t| t.name == call.name)
            .map(|t| t.server.clone());

        let outcome = match &server {
            Some(server) => self.call(server, &call.name, call.arguments.clone(), worker_endpoint).await,
            None => Err(DispatchError::UnknownTool(call.name.clone())),
        };
        let server = server.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        let (output, is_error) = match outcome {
            Ok(value) => (value, false),
            Err(e) => {
                warn!(tool = %call.name, server = %server, error = %e, "Tool call failed");
                (Value::String(e.to_string()), true)
            }
        };
        metrics::counter!(
            "gopilot_tool_calls_total",
            "server" => if server.is_empty() { "unknown".to_string() } else { server.clone() },
            "outcome" => if is_error { "error" } else { "ok" }
        )
        .increment(1);

        ToolResult {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            server,
            output,
            is_error,
            duration_ms,
        }
    }

    /// Direct call on a named external server. Without a server name the
    /// tool is looked up across the external servers.
    pub async fn invoke(&self, server: Option<&str>, tool: &str, arguments: Value) -> Result<Value, DispatchError> {
        let server = match server {
            Some(server) => server.to_string(),
            None => self
                .catalogue(None)
                .await
                .into_iter()
                .find(|t| t.name == tool)
                .map(|t| t.server)
                .ok_or_else(|| DispatchError::UnknownTool(tool.to_string()))?,
        };
        self.call(&server, tool, arguments, None).await
    }

    /// Limit for one call: the server's base limit, stretched to cover a
    /// `timeout` argument the call asks for.
    fn call_timeout(&self, server: &str, arguments: &Value) -> Duration {
        let base = if server == WORKSPACE_SERVER {
            self.workspace_timeout
        } else {
            self.tool_timeout
        };
        match arguments.get("timeout").and_then(Value::as_u64) {
            Some(secs) => base.max(Duration::from_secs(secs).min(MAX_REQUESTED_TIMEOUT) + REQUESTED_TIMEOUT_MARGIN),
            None => base,
        }
    }

    async fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        worker_endpoint: Option<&str>,
    ) -> Result<Value, DispatchError> {
        let arguments = normalize_arguments(tool, arguments)?;
        let client = self.client(server, worker_endpoint)?;
        let limit = self.call_timeout(server, &arguments);
        debug!(tool, server, timeout_secs = limit.as_secs(), "Dispatching tool call");
        match tokio::time::timeout(limit, client.call_tool(tool, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(limit.as_secs())),
        }
    }
}

/// Models sometimes send arguments as a JSON string; accept that, require an object.
fn normalize_arguments(tool: &str, arguments: Value) -> Result<Value, DispatchError> {
    let invalid = |reason: String| DispatchError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };
    let value = match arguments {
        Value::String(raw) if raw.trim().is_empty() => Value::Object(Map::new()),
        Value::String(raw) => serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?,
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    match value {
        Value::Object(_) => Ok(value),
        other => Err(invalid(format!("expected a JSON object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticServer {
        tools: Vec<&'static str>,
        fail_list: bool,
    }

    #[async_trait]
    impl ToolClient for StaticServer {
        async fn initialize(&self) -> Result<(), DispatchError> {
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, DispatchError> {
            if self.fail_list {
                return Err(DispatchError::Transport("connection refused".into()));
            }
            Ok(self
                .tools
                .iter()
                .map(|name| ToolDescriptor {
                    name: name.to_string(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                    server: String::new(),
                })
                .collect())
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, DispatchError> {
            if name == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(json!({"tool": name, "echo": arguments}))
        }
    }

    fn dispatcher() -> TaskDispatcher {
        let dispatcher = TaskDispatcher::new(reqwest::Client::new(), Duration::from_millis(200));
        dispatcher.register("db", Arc::new(StaticServer { tools: vec!["query", "search"], fail_list: false }));
        dispatcher.register("memory", Arc::new(StaticServer { tools: vec!["search", "remember", "slow"], fail_list: false }));
        dispatcher.register("broken", Arc::new(StaticServer { tools: vec!["never"], fail_list: true }));
        dispatcher
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_catalogue_first_server_wins_and_skips_failures() {
        let catalogue = dispatcher().catalogue(None).await;
        let pairs: Vec<(&str, &str)> = catalogue.iter().map(|t| (t.name.as_str(), t.server.as_str())).collect();
        assert_eq!(
            pairs,
            vec![("query", "db"), ("search", "db"), ("remember", "memory"), ("slow", "memory")]
        );
    }

    #[tokio::test]
    async fn test_dispatch_routes_and_tags_results() {
        let dispatcher = dispatcher();
        let catalogue = dispatcher.catalogue(None).await;

        let result = dispatcher
            .dispatch(&call("remember", json!("{\"fact\": \"x\"}")), &catalogue, None)
            .await;
        assert!(!result.is_error);
        assert_eq!(result.call_id, "call_remember");
        assert_eq!(result.server, "memory");
        assert_eq!(result.output["echo"], json!({"fact": "x"}));
    }

    #[tokio::test]
    async fn test_dispatch_failures_become_error_results() {
        let dispatcher = dispatcher();
        let catalogue = dispatcher.catalogue(None).await;

        let unknown = dispatcher.dispatch(&call("teleport", json!({})), &catalogue, None).await;
        assert!(unknown.is_error);
        assert_eq!(unknown.output, json!("Unknown tool: teleport"));

        let malformed = dispatcher.dispatch(&call("query", json!("not json")), &catalogue, None).await;
        assert!(malformed.is_error);
        assert_eq!(malformed.server, "db");

        let list_args = dispatcher.dispatch(&call("query", json!([1, 2])), &catalogue, None).await;
        assert!(list_args.is_error);

        let slow = dispatcher.dispatch(&call("slow", json!({})), &catalogue, None).await;
        assert!(slow.is_error);
    }

    #[tokio::test]
    async fn test_invoke_pass_through() {
        let dispatcher = dispatcher();
        let value = dispatcher.invoke(None, "search", json!({"q": "rust"})).await.unwrap();
        assert_eq!(value["tool"], "search");

        let value = dispatcher.invoke(Some("memory"), "search", json!({})).await.unwrap();
        assert_eq!(value["tool"], "search");

        assert!(matches!(
            dispatcher.invoke(None, "teleport", json!({})).await,
            Err(DispatchError::UnknownTool(_))
        ));
        assert!(matches!(
            dispatcher.invoke(Some("nowhere"), "search", json!({})).await,
            Err(DispatchError::UnknownServer(_))
        ));
    }

    #[test]
    fn test_call_timeout_covers_requested_timeout() {
        let dispatcher = TaskDispatcher::new(reqwest::Client::new(), Duration::from_secs(60))
            .with_workspace_timeout(Duration::from_secs(330));

        assert_eq!(dispatcher.call_timeout("db", &json!({})), Duration::from_secs(60));
        assert_eq!(dispatcher.call_timeout(WORKSPACE_SERVER, &json!({})), Duration::from_secs(330));
        assert_eq!(
            dispatcher.call_timeout(WORKSPACE_SERVER, &json!({"command": "make", "timeout": 900})),
            Duration::from_secs(915)
        );
        assert_eq!(dispatcher.call_timeout("db", &json!({"timeout": 5})), Duration::from_secs(60));
        assert_eq!(
            dispatcher.call_timeout("db", &json!({"timeout": u64::MAX})),
            MAX_REQUESTED_TIMEOUT + REQUESTED_TIMEOUT_MARGIN
        );
    }

    fn server_config(name: &str, url: String) -> ToolServerConfig {
        ToolServerConfig {
            name: name.to_string(),
            url,
            transport: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_attach_registers_server_after_listing() {
        let mut upstream = mockito::Server::new_async().await;
        upstream
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJson(json!({"method": "tools/list"})))
            .with_header("content-type", "application/json")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": [
                    {"name": "browse", "description": "Fetch a page", "inputSchema": {"type": "object"}}
                ]}})
                .to_string(),
            )
            .create_async()
            .await;
        let url = format!("{}/mcp", upstream.url());

        let dispatcher = dispatcher().with_loopback(true);
        let tools = dispatcher.attach(&server_config("web", url.clone())).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server, "web");
        assert_eq!(dispatcher.server_names(), vec!["db", "memory", "broken", "web"]);

        let catalogue = dispatcher.catalogue(None).await;
        assert!(catalogue.iter().any(|t| t.name == "browse" && t.server == "web"));

        assert!(matches!(
            dispatcher.attach(&server_config("web", url.clone())).await,
            Err(DispatchError::ServerExists(_))
        ));
        assert!(matches!(
            dispatcher.attach(&server_config(WORKSPACE_SERVER, url)).await,
            Err(DispatchError::InvalidServer(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_rejects_loopback_and_unreachable_servers() {
        let dispatcher = dispatcher();
        assert!(matches!(
            dispatcher.attach(&server_config("local", "http://127.0.0.1:9/mcp".into())).await,
            Err(DispatchError::InvalidServer(_))
        ));

        let dispatcher = dispatcher.with_loopback(true);
        assert!(dispatcher.attach(&server_config("local", "http://127.0.0.1:9/mcp".into())).await.is_err());
        assert!(!dispatcher.server_names().contains(&"local".to_string()));
    }

    async fn health_server(body: Value) -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;
        server
    }

    #[tokio::test]
    async fn test_wait_for_workspace_follows_reported_state() {
        let dispatcher = dispatcher();

        let ready = health_server(json!({"status": "healthy", "workspace": {"state": "ready"}})).await;
        dispatcher.wait_for_workspace(&ready.url(), Duration::from_secs(1)).await.unwrap();

        let failed = health_server(json!({"workspace": {"state": "failed", "error": "git clone failed"}})).await;
        let err = dispatcher.wait_for_workspace(&failed.url(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, DispatchError::WorkerNotReady(ref m) if m.contains("git clone failed")));

        let busy = health_server(json!({"workspace": {"state": "initializing"}})).await;
        let err = dispatcher.wait_for_workspace(&busy.url(), Duration::from_millis(600)).await.unwrap_err();
        assert!(matches!(err, DispatchError::WorkerNotReady(ref m) if m.contains("initializing")));

        // No readiness in the body: initialize already answered, so go ahead.
        let legacy = health_server(json!({"status": "healthy"})).await;
        dispatcher.wait_for_workspace(&legacy.url(), Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn test_normalize_arguments() {
        assert_eq!(normalize_arguments("t", Value::Null).unwrap(), json!({}));
        assert_eq!(normalize_arguments("t", json!("")).unwrap(), json!({}));
        assert_eq!(normalize_arguments("t", json!("{\"a\":1}")).unwrap(), json!({"a": 1}));
        assert!(normalize_arguments("t", json!(3)).is_err());
    }
}
