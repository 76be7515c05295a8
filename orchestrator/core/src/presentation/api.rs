// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// HTTP API
//
// Axum router for the orchestrator service. Handlers translate HTTP into
// application service calls and map typed errors onto status codes; no
// orchestration logic lives here.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::proxy;
use crate::application::orchestrator::{OrchestrationError, Orchestrator};
use crate::domain::container::ContainerError;
use crate::domain::llm::LLMError;
use crate::domain::mcp::{DispatchError, ToolServerConfig};
use crate::domain::task::TaskRequest;
use crate::domain::workspace::WorkspaceId;
use crate::infrastructure::event_bus::{DomainEvent, EventBus};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub event_bus: EventBus,
    pub metrics: Option<PrometheusHandle>,
    pub jwt_key: Option<Arc<DecodingKey>>,
    pub started_at: Instant,
    /// Cancelled when the service shuts down; ends open event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, event_bus: EventBus) -> Self {
        Self {
            orchestrator,
            event_bus,
            metrics: None,
            jwt_key: None,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Require an HS256 bearer token signed with `secret` on protected routes.
    pub fn with_jwt_secret(mut self, secret: &str) -> Self {
        self.jwt_key = Some(Arc::new(DecodingKey::from_secret(secret.as_bytes())));
        self
    }
}

/// Install the global Prometheus recorder. Call once per process.
pub fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Error body shared by every endpoint: `{"status":"error","error":msg}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"status": "error", "error": self.message}))).into_response()
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(e: OrchestrationError) -> Self {
        let status = match &e {
            OrchestrationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestrationError::ContainerStart(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrchestrationError::Gateway(_) => StatusCode::BAD_GATEWAY,
            OrchestrationError::RoundLimitExceeded(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<ContainerError> for ApiError {
    fn from(e: ContainerError) -> Self {
        let status = match &e {
            ContainerError::NotFound(_) => StatusCode::NOT_FOUND,
            ContainerError::StartFailed(_) | ContainerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ContainerError::StopFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let status = match &e {
            DispatchError::UnknownTool(_) | DispatchError::UnknownServer(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidArguments { .. } | DispatchError::InvalidServer(_) => StatusCode::BAD_REQUEST,
            DispatchError::ServerExists(_) => StatusCode::CONFLICT,
            DispatchError::WorkerNotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::ToolFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::Transport(_) | DispatchError::Timeout(_) | DispatchError::Protocol { .. } => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<LLMError> for ApiError {
    fn from(e: LLMError) -> Self {
        let status = match &e {
            LLMError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LLMError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            LLMError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

pub fn router(state: AppState, allowed_origin: Option<&str>) -> Router {
    let protected = Router::new()
        .route("/orchestrate", post(orchestrate_handler))
        .route("/containers", get(list_containers_handler))
        .route("/manage", post(manage_handler))
        .route("/tools/servers", get(list_tool_servers_handler).post(attach_tool_server_handler))
        .route("/tools/{name}/invoke", post(invoke_tool_handler))
        .route("/events", get(events_handler))
        .route("/v1/models", get(proxy::list_models_handler))
        .route("/v1/chat/completions", post(proxy::chat_completions_handler))
        .route("/vertex/predict", post(proxy::vertex_predict_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_jwt));

    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let mut app = protected.merge(public).with_state(state).layer(TraceLayer::new_for_http());

    if let Some(origin) = allowed_origin {
        match origin.parse::<HeaderValue>() {
            Ok(origin) => {
                app = app.layer(
                    CorsLayer::new()
                        .allow_origin(origin)
                        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
                );
            }
            Err(e) => warn!("Ignoring invalid CORS origin '{}': {}", origin, e),
        }
    }

    app
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

async fn require_jwt(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, ApiError> {
    let Some(key) = &state.jwt_key else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

    let claims = decode::<Claims>(token, key, &Validation::new(Algorithm::HS256))
        .map_err(|e| ApiError::new(StatusCode::UNAUTHORIZED, format!("invalid token: {}", e)))?
        .claims;
    debug!(subject = ?claims.sub, "Authenticated request");

    Ok(next.run(request).await)
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = state.started_at.elapsed().as_secs();
    match state.orchestrator.lifecycle().runtime_health().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": uptime,
            "docker": "ok",
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_seconds": uptime,
                "docker": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn orchestrate_handler(
    State(state): State<AppState>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let result = state.orchestrator.orchestrate(request).await?;
    Ok(Json(json!(result)))
}

async fn list_containers_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let containers = state.orchestrator.lifecycle().list().await?;
    Ok(Json(json!({"containers": containers})))
}

#[derive(Debug, Deserialize)]
struct ManageRequest {
    action: String,
    #[serde(default)]
    workspace_id: Option<String>,
}

async fn manage_handler(
    State(state): State<AppState>,
    payload: Result<Json<ManageRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let lifecycle = state.orchestrator.lifecycle();

    match request.action.as_str() {
        "list" => {
            let containers = lifecycle.list().await?;
            Ok(Json(json!({"status": "success", "containers": containers})))
        }
        "stop" => {
            let raw = request
                .workspace_id
                .as_deref()
                .ok_or_else(|| ApiError::bad_request("workspace_id is required for stop"))?;
            let workspace = WorkspaceId::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))?;
            let record = lifecycle.stop(&workspace).await?;
            Ok(Json(json!({"status": "success", "message": format!("Container {} stopped", record.container_name), "container": record})))
        }
        other => Err(ApiError::bad_request(format!("Unknown action: {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct InvokeQuery {
    #[serde(default)]
    server: Option<String>,
}

async fn invoke_tool_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<InvokeQuery>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(arguments) = payload?;
    let output = state
        .orchestrator
        .dispatcher()
        .invoke(query.server.as_deref(), &name, arguments)
        .await?;
    Ok(Json(output))
}

async fn list_tool_servers_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"servers": state.orchestrator.dispatcher().server_names()}))
}

async fn attach_tool_server_handler(
    State(state): State<AppState>,
    payload: Result<Json<ToolServerConfig>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(server) = payload?;
    let tools = state.orchestrator.dispatcher().attach(&server).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"status": "attached", "server": server.name.trim(), "tools": tools})),
    ))
}

fn sse_event(event: DomainEvent) -> Result<Event, axum::Error> {
    let kind = match &event {
        DomainEvent::Container(_) => "container",
        DomainEvent::Task(_) => "task",
    };
    Event::default().event(kind).json_data(&event)
}

async fn events_handler(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = state
        .event_bus
        .stream()
        .map(sse_event)
        .take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(stream).keep_alive(KeepAlive::default())
}
