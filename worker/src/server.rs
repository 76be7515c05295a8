// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// Worker HTTP server
//
// `GET /health` for liveness checks and `POST /mcp` speaking MCP JSON-RPC 2.0 to the
// orchestrator's dispatcher.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::tools::{descriptors, WorkspaceTools};
use crate::workspace::Workspace;
use gopilot_core::domain::mcp::{
    CallToolResult, JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    MCP_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_NOT_FOUND, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PARSE_ERROR,
};

pub struct WorkerState {
    pub workspace: Workspace,
    pub tools: WorkspaceTools,
}

impl WorkerState {
    pub fn new(workspace: Workspace) -> Self {
        let config = workspace.config();
        let tools = WorkspaceTools::new(config.workspace_path.clone(), config.command_timeout);
        Self { workspace, tools }
    }
}

pub fn router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/mcp", post(mcp_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<WorkerState>>) -> Json<Value> {
    let config = state.workspace.config();
    Json(json!({
        "status": "healthy",
        "workspace_id": config.workspace_id,
        "workspace_path": config.workspace_path.display().to_string(),
        "workspace_exists": config.workspace_path.exists(),
        "initialized": state.workspace.is_initialized(),
        "workspace": state.workspace.status(),
    }))
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn mcp_handler(
    State(state): State<Arc<WorkerState>>,
    payload: Result<Json<JsonRpcRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(e) => {
            return Json(JsonRpcResponse::failure(Value::Null, PARSE_ERROR, e.body_text())).into_response();
        }
    };

    // Notifications get no JSON-RPC reply.
    let Some(id) = request.id.clone() else {
        debug!(method = %request.method, "Notification received");
        return StatusCode::ACCEPTED.into_response();
    };

    if request.jsonrpc != JSONRPC_VERSION {
        return Json(JsonRpcResponse::failure(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"")).into_response();
    }

    Json(handle_request(&state, id, &request.method, request.params).await).into_response()
}

async fn handle_request(state: &WorkerState, id: Value, method: &str, params: Option<Value>) -> JsonRpcResponse {
    match method {
        METHOD_INITIALIZE => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "gopilot-worker", "version": env!("CARGO_PKG_VERSION")}
            }),
        ),
        METHOD_TOOLS_LIST => JsonRpcResponse::success(id, json!({"tools": descriptors()})),
        METHOD_TOOLS_CALL => {
            let params: CallParams = match serde_json::from_value(params.unwrap_or(Value::Null)) {
                Ok(params) => params,
                Err(e) => return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("invalid tools/call params: {e}")),
            };
            match call_tool(state, &params.name, params.arguments).await {
                Ok(result) => JsonRpcResponse::success(id, result_value(result)),
                Err(WorkerError::UnknownTool(name)) => {
                    JsonRpcResponse::failure(id, INVALID_PARAMS, format!("Unknown tool: {name}"))
                }
                Err(e) => {
                    warn!(tool = %params.name, error = %e, "Tool call failed");
                    JsonRpcResponse::success(
                        id,
                        result_value(CallToolResult::from_value(Value::String(e.to_string()), true)),
                    )
                }
            }
        }
        other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
    }
}

async fn call_tool(state: &WorkerState, name: &str, arguments: Value) -> Result<CallToolResult, WorkerError> {
    state.workspace.ensure_initialized().await?;
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    let output = state.tools.call(name, arguments).await?;
    Ok(CallToolResult::from_value(output, false))
}

fn result_value(result: CallToolResult) -> Value {
    serde_json::to_value(result).unwrap_or_else(|e| json!({"content": [{"type": "text", "text": e.to_string()}], "isError": true}))
}
