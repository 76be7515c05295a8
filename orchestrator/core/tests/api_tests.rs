// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface tests driven through `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use gopilot_core::application::{
    ContainerLifecycleManager, LifecycleSettings, Orchestrator, OrchestratorSettings, TaskDispatcher,
};
use gopilot_core::domain::config::OrchestratorConfig;
use gopilot_core::domain::container::{RuntimeContainer, MANAGED_LABEL, WORKSPACE_LABEL};
use gopilot_core::domain::llm::{ChatCompletion, ChatRequest, LLMError, ModelGateway};
use gopilot_core::domain::workspace::WorkspaceId;
use gopilot_core::infrastructure::event_bus::EventBus;
use gopilot_core::infrastructure::memory_runtime::InMemoryContainerRuntime;
use gopilot_core::presentation::api::{router, AppState};

struct EchoGateway;

#[async_trait]
impl ModelGateway for EchoGateway {
    async fn complete(&self, _request: &ChatRequest) -> Result<ChatCompletion, LLMError> {
        Err(LLMError::Provider("not used".into()))
    }

    async fn passthrough(&self, body: Value) -> Result<Value, LLMError> {
        let last = body["messages"]
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m["content"].as_str())
            .unwrap_or_default()
            .to_string();
        Ok(json!({
            "id": "chatcmpl-echo",
            "object": "chat.completion",
            "created": 1700000000,
            "model": body["model"].as_str().unwrap_or("echo-model"),
            "choices": [{"index": 0, "message": {"role": "assistant", "content": format!("echo: {last}")}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
    }

    async fn predict(&self, body: Value) -> Result<Value, LLMError> {
        Ok(json!({"predictions": [body], "deployedModelId": "echo"}))
    }

    fn models(&self) -> Vec<String> {
        vec!["echo-model".into()]
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        Ok(())
    }
}

fn state_with(runtime: Arc<InMemoryContainerRuntime>, jwt_secret: Option<&str>) -> AppState {
    let config = OrchestratorConfig::default();
    let bus = EventBus::new(16);
    let lifecycle = Arc::new(ContainerLifecycleManager::new(
        runtime,
        LifecycleSettings::from_config(&config),
        bus.clone(),
    ));
    let dispatcher = Arc::new(TaskDispatcher::new(reqwest::Client::new(), Duration::from_secs(1)).with_loopback(true));
    let orchestrator = Arc::new(Orchestrator::new(
        lifecycle,
        dispatcher,
        Arc::new(EchoGateway),
        bus.clone(),
        OrchestratorSettings::from_config(&config),
    ));

    let mut state = AppState::new(orchestrator, bus);
    if let Some(secret) = jwt_secret {
        state = state.with_jwt_secret(secret);
    }
    state
}

fn app_with(runtime: Arc<InMemoryContainerRuntime>, jwt_secret: Option<&str>) -> Router {
    router(state_with(runtime, jwt_secret), None)
}

fn app() -> Router {
    app_with(Arc::new(InMemoryContainerRuntime::new()), None)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_reports_docker_status() {
    let runtime = Arc::new(InMemoryContainerRuntime::new());
    let app = app_with(runtime.clone(), None);

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["docker"], "ok");
    assert!(body["uptime_seconds"].is_u64());

    runtime.set_unavailable(true);
    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_manage_validation() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post_json("/manage", json!({"action": "restart", "workspace_id": "default"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().unwrap().contains("restart"));

    let response = app
        .clone()
        .oneshot(post_json("/manage", json!({"action": "stop"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post_json("/manage", json!({"action": "stop", "workspace_id": "../etc"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json("/manage", json!({"action": "stop", "workspace_id": "nobody"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manage_stop_and_list_runtime_containers() {
    let runtime = Arc::new(InMemoryContainerRuntime::new());
    let workspace = WorkspaceId::parse("alpha").unwrap();
    runtime.seed(RuntimeContainer {
        id: "c-alpha".into(),
        name: workspace.container_name(),
        image: "agent:1".into(),
        running: true,
        labels: HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (WORKSPACE_LABEL.to_string(), "alpha".to_string()),
        ]),
    });
    let app = app_with(runtime.clone(), None);

    let response = app.clone().oneshot(get("/containers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["containers"][0]["workspace_id"], "alpha");

    let response = app
        .clone()
        .oneshot(post_json("/manage", json!({"action": "stop", "workspace_id": "alpha"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["container"]["status"], "stopped");
    assert!(!runtime.is_running(&workspace.container_name()));

    let response = app
        .oneshot(post_json("/manage", json!({"action": "list"})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["containers"][0]["status"], "stopped");
}

#[tokio::test]
async fn test_orchestrate_rejects_bad_bodies() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post_json("/orchestrate", json!({"repo_url": "https://github.com/a/b"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json("/orchestrate", json!({"query": "  "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_jwt_required_when_configured() {
    let app = app_with(Arc::new(InMemoryContainerRuntime::new()), Some("s3cret"));

    let response = app.clone().oneshot(get("/containers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/containers")
                .header(header::AUTHORIZATION, "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
    let token = encode(
        &Header::default(),
        &json!({"sub": "ide-client", "exp": exp}),
        &EncodingKey::from_secret(b"s3cret"),
    )
    .unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/containers")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Health stays open for liveness checks.
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_models_listing() {
    let response = app().oneshot(get("/v1/models")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "echo-model");
}

#[tokio::test]
async fn test_chat_completions_passthrough() {
    let response = app()
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({"messages": [{"role": "user", "content": "ping"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "echo: ping");
}

#[tokio::test]
async fn test_chat_completions_streamed_as_sse() {
    let response = app()
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({"stream": true, "messages": [{"role": "user", "content": "ping"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("chat.completion.chunk"));
    assert!(text.contains("echo: ping"));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_chat_completions_requires_messages() {
    let response = app()
        .oneshot(post_json("/v1/chat/completions", json!({"model": "x"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invoke_unknown_tool_is_not_found() {
    let response = app()
        .oneshot(post_json("/tools/search_issues/invoke", json!({"q": "bug"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app()
        .oneshot(post_json("/tools/search_issues/invoke?server=toolbox", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let response = app().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_vertex_predict_passes_body_through() {
    let app = app();
    let body = json!({"instances": [{"prompt": "hi"}], "parameters": {"maxOutputTokens": 16}});

    let response = app.clone().oneshot(post_json("/vertex/predict", body.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert_eq!(reply["predictions"][0], body);
    assert_eq!(reply["deployedModelId"], "echo");

    let response = app.oneshot(post_json("/vertex/predict", json!([1, 2]))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_attach_tool_server_at_runtime() {
    let mut upstream = mockito::Server::new_async().await;
    upstream
        .mock("POST", "/mcp")
        .match_body(mockito::Matcher::PartialJson(json!({"method": "tools/list"})))
        .with_header("content-type", "application/json")
        .with_body(
            json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": [
                {"name": "search_docs", "description": "Search docs", "inputSchema": {"type": "object"}}
            ]}})
            .to_string(),
        )
        .create_async()
        .await;
    let server = json!({"name": "docs", "url": format!("{}/mcp", upstream.url())});
    let app = app();

    let response = app.clone().oneshot(post_json("/tools/servers", server.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "attached");
    assert_eq!(body["server"], "docs");
    assert_eq!(body["tools"][0]["name"], "search_docs");

    let response = app.clone().oneshot(get("/tools/servers")).await.unwrap();
    assert_eq!(body_json(response).await["servers"], json!(["docs"]));

    let response = app.clone().oneshot(post_json("/tools/servers", server)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(post_json("/tools/servers", json!({"name": "workspace", "url": "http://worker:8081/mcp"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(post_json("/tools/servers", json!({"name": "docs"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_event_stream_ends_on_shutdown() {
    let shutdown = tokio_util::sync::CancellationToken::new();
    let state = state_with(Arc::new(InMemoryContainerRuntime::new()), None).with_shutdown(shutdown.clone());
    let app = router(state, None);

    let response = app.oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = tokio::spawn(to_bytes(response.into_body(), usize::MAX));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!body.is_finished());

    shutdown.cancel();
    let collected = tokio::time::timeout(Duration::from_secs(2), body).await;
    assert!(collected.is_ok(), "event stream stayed open after shutdown");
}
