// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for a running orchestrator

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use gopilot_core::domain::container::ContainerRecord;
use gopilot_core::domain::task::{OrchestrationResult, TaskRequest};

#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl OrchestratorClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            // Orchestration runs as long as the model keeps calling tools.
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn orchestrate(&self, request: &TaskRequest) -> Result<OrchestrationResult> {
        let response = self
            .authorized(self.client.post(format!("{}/orchestrate", self.base_url)))
            .json(request)
            .send()
            .await
            .context("Failed to reach orchestrator")?;
        let response = ensure_success(response, "Orchestration failed").await?;

        response
            .json()
            .await
            .context("Failed to parse orchestration response")
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        let response = self
            .authorized(self.client.get(format!("{}/containers", self.base_url)))
            .send()
            .await
            .context("Failed to reach orchestrator")?;
        let response = ensure_success(response, "Failed to list containers").await?;

        #[derive(Deserialize)]
        struct ListResponse {
            containers: Vec<ContainerRecord>,
        }

        let list: ListResponse = response
            .json()
            .await
            .context("Failed to parse container list")?;
        Ok(list.containers)
    }

    pub async fn stop_container(&self, workspace_id: &str) -> Result<ContainerRecord> {
        let response = self
            .authorized(self.client.post(format!("{}/manage", self.base_url)))
            .json(&json!({"action": "stop", "workspace_id": workspace_id}))
            .send()
            .await
            .context("Failed to reach orchestrator")?;
        let response = ensure_success(response, "Failed to stop container").await?;

        #[derive(Deserialize)]
        struct StopResponse {
            container: ContainerRecord,
        }

        let stopped: StopResponse = response
            .json()
            .await
            .context("Failed to parse stop response")?;
        Ok(stopped.container)
    }

    /// Health body plus status; an unhealthy service is a result, not an error.
    pub async fn health(&self) -> Result<(StatusCode, Value)> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("Failed to reach orchestrator")?;
        let status = response.status();
        let body = response
            .json()
            .await
            .context("Failed to parse health response")?;
        Ok((status, body))
    }
}

/// Turn a non-2xx response into an error carrying the server's message.
async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);
    anyhow::bail!("{} ({}): {}", what, status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_containers_sends_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/containers")
            .match_header("authorization", "Bearer t0k")
            .with_header("content-type", "application/json")
            .with_body(json!({"containers": []}).to_string())
            .create_async()
            .await;

        let client = OrchestratorClient::new(&server.url(), Some("t0k".into())).unwrap();
        assert!(client.list_containers().await.unwrap().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_body_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/manage")
            .with_status(404)
            .with_body(json!({"status": "error", "error": "No container for workspace: ghost"}).to_string())
            .create_async()
            .await;

        let client = OrchestratorClient::new(&server.url(), None).unwrap();
        let err = client.stop_container("ghost").await.unwrap_err().to_string();
        assert!(err.contains("404"));
        assert!(err.contains("No container for workspace: ghost"));
    }

    #[tokio::test]
    async fn test_unhealthy_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(503)
            .with_body(json!({"status": "unhealthy", "docker": "down"}).to_string())
            .create_async()
            .await;

        let client = OrchestratorClient::new(&format!("{}/", server.url()), None).unwrap();
        let (status, body) = client.health().await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["docker"], "down");
    }
}
