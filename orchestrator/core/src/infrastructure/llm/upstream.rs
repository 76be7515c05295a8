// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// Model upstream selection and transport
//
// Resolves which backend the gateway talks to and with which credential,
// then performs the raw JSON POSTs shared by both gateway adapters.

use crate::domain::config::{ConfigError, OrchestratorConfig, UpstreamAuth};
use crate::domain::llm::LLMError;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMode {
    /// OpenAI-compatible `/v1/chat/completions`.
    ChatCompletions,
    /// Managed prediction endpoint (`instances` / `predictions`).
    Predict,
}

#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub mode: UpstreamMode,
    pub url: String,
    bearer: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|v| v.trim().trim_end_matches('/'))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl UpstreamTarget {
    /// Predict URL, then chat completions URL, then API base URL, then the
    /// self-hosted model server.
    pub fn resolve(config: &OrchestratorConfig) -> Result<Self, ConfigError> {
        let model = &config.model;
        let (mode, url, self_hosted) = if let Some(url) = non_empty(&model.predict_url) {
            (UpstreamMode::Predict, url, false)
        } else if let Some(url) = non_empty(&model.chat_completions_url) {
            (UpstreamMode::ChatCompletions, url, false)
        } else if let Some(base) = non_empty(&model.api_base_url) {
            (UpstreamMode::ChatCompletions, format!("{base}/v1/chat/completions"), false)
        } else {
            (
                UpstreamMode::ChatCompletions,
                model.gpt_oss_url.trim_end_matches('/').to_string(),
                true,
            )
        };

        config.check_upstream(&url)?;

        let bearer = match model.auth {
            UpstreamAuth::Bearer => match non_empty(&model.api_key).or_else(|| non_empty(&model.llm_api_key)) {
                Some(key) => Some(key),
                None if self_hosted => None,
                None => return Err(ConfigError::MissingCredential("UPSTREAM_API_KEY")),
            },
            UpstreamAuth::Gcloud => Some(
                non_empty(&model.google_access_token).ok_or(ConfigError::MissingCredential("GOOGLE_ACCESS_TOKEN"))?,
            ),
            UpstreamAuth::None => None,
        };

        Ok(Self { mode, url, bearer })
    }

    pub fn has_credential(&self) -> bool {
        self.bearer.is_some()
    }
}

pub struct UpstreamClient {
    http: reqwest::Client,
    target: UpstreamTarget,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, target: UpstreamTarget) -> Self {
        Self { http, target }
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.target.bearer {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    pub async fn post_json(&self, body: &Value, model: &str) -> Result<Value, LLMError> {
        debug!(url = %self.target.url, model, "Upstream model request");
        let response = self
            .authorize(self.http.post(&self.target.url))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::from_status(status, error_text, model));
        }

        response
            .json()
            .await
            .map_err(|e| LLMError::Provider(format!("Failed to parse response: {}", e)))
    }

    /// Reachability check: any answer other than an auth rejection or a 5xx counts.
    pub async fn check_reachable(&self) -> Result<(), LLMError> {
        let response = self
            .authorize(self.http.get(&self.target.url))
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;
        let status = response.status();
        if status == 401 || status == 403 {
            Err(LLMError::Authentication("Upstream rejected credentials".into()))
        } else if status.is_server_error() {
            Err(LLMError::Network(format!("HTTP {}", status)))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::default()
    }

    #[test]
    fn test_resolution_order() {
        let mut config = config();
        config.model.api_base_url = Some("https://llm.example.com/".into());
        config.model.api_key = Some("key".into());
        let target = UpstreamTarget::resolve(&config).unwrap();
        assert_eq!(target.url, "https://llm.example.com/v1/chat/completions");
        assert_eq!(target.mode, UpstreamMode::ChatCompletions);

        config.model.chat_completions_url = Some("https://chat.example.com/v1/chat/completions".into());
        assert_eq!(UpstreamTarget::resolve(&config).unwrap().url, "https://chat.example.com/v1/chat/completions");

        config.model.predict_url = Some("https://us-central1-aiplatform.googleapis.com/v1/endpoints/1:predict".into());
        let target = UpstreamTarget::resolve(&config).unwrap();
        assert_eq!(target.mode, UpstreamMode::Predict);
    }

    #[test]
    fn test_self_hosted_fallback_needs_no_key() {
        let target = UpstreamTarget::resolve(&config()).unwrap();
        assert_eq!(target.url, "http://gpt-oss:8000/v1/chat/completions");
        assert!(!target.has_credential());
    }

    #[test]
    fn test_credentials_per_auth_mode() {
        let mut config = config();
        config.model.chat_completions_url = Some("https://chat.example.com/v1/chat/completions".into());
        assert_eq!(
            UpstreamTarget::resolve(&config).err(),
            Some(ConfigError::MissingCredential("UPSTREAM_API_KEY"))
        );

        config.model.llm_api_key = Some("shared".into());
        assert!(UpstreamTarget::resolve(&config).unwrap().has_credential());

        config.model.auth = UpstreamAuth::Gcloud;
        assert_eq!(
            UpstreamTarget::resolve(&config).err(),
            Some(ConfigError::MissingCredential("GOOGLE_ACCESS_TOKEN"))
        );
        config.model.google_access_token = Some("ya29.token".into());
        assert!(UpstreamTarget::resolve(&config).is_ok());

        config.model.auth = UpstreamAuth::None;
        assert!(!UpstreamTarget::resolve(&config).unwrap().has_credential());
    }

    #[test]
    fn test_loopback_upstream_rejected() {
        let mut config = config();
        config.model.auth = UpstreamAuth::None;
        config.model.chat_completions_url = Some("http://127.0.0.1:8000/v1/chat/completions".into());
        assert!(matches!(UpstreamTarget::resolve(&config), Err(ConfigError::LoopbackUpstream(_))));
    }
}
