// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// Prediction-endpoint Model Gateway
//
// Wraps OpenAI-shaped chat requests into the managed prediction format
// (`{"instances": [{"@requestFormat": "chatCompletions", ...}]}`) and maps
// `predictions` back into a `chat.completion` object.

use super::openai::{parse_completion, request_body, with_default_model};
use super::upstream::UpstreamClient;
use crate::domain::llm::{ChatCompletion, ChatRequest, LLMError, ModelGateway};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Fields copied from the chat body into the prediction instance.
const INSTANCE_FIELDS: &[&str] = &["max_tokens", "temperature", "tools", "tool_choice"];

pub(crate) fn to_instance_payload(body: &Value) -> Value {
    let mut instance = Map::new();
    instance.insert("@requestFormat".to_string(), json!("chatCompletions"));
    instance.insert(
        "messages".to_string(),
        body.get("messages").cloned().unwrap_or_else(|| json!([])),
    );
    for field in INSTANCE_FIELDS {
        if let Some(value) = body.get(*field) {
            instance.insert(field.to_string(), value.clone());
        }
    }
    json!({"instances": [Value::Object(instance)]})
}

/// `predictions` may be an object or a list; the first element wins.
pub(crate) fn from_predictions(response: Value, fallback_model: &str) -> Value {
    let prediction = match response.get("predictions") {
        Some(Value::Array(items)) => items.first().cloned().unwrap_or_else(|| json!({})),
        Some(Value::Object(obj)) => Value::Object(obj.clone()),
        _ => json!({}),
    };
    let field = |name: &str| prediction.get(name).cloned().filter(|v| !v.is_null());

    json!({
        "id": field("id").unwrap_or_else(|| json!("chatcmpl")),
        "object": "chat.completion",
        "created": field("created").unwrap_or(Value::Null),
        "model": field("model").unwrap_or_else(|| json!(fallback_model)),
        "choices": field("choices").unwrap_or_else(|| json!([])),
        "usage": field("usage").unwrap_or_else(|| json!({})),
    })
}

pub struct VertexPredictGateway {
    upstream: UpstreamClient,
    default_model: String,
}

impl VertexPredictGateway {
    pub fn new(upstream: UpstreamClient, default_model: String) -> Self {
        Self {
            upstream,
            default_model,
        }
    }
}

#[async_trait]
impl ModelGateway for VertexPredictGateway {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LLMError> {
        let body = request_body(request, &self.default_model);
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let response = self.passthrough(body).await?;
        parse_completion(response, model)
    }

    async fn passthrough(&self, body: Value) -> Result<Value, LLMError> {
        let body = with_default_model(body, &self.default_model);
        let model = body["model"].as_str().unwrap_or(&self.default_model).to_string();
        let response = self.upstream.post_json(&to_instance_payload(&body), &model).await?;
        Ok(from_predictions(response, &model))
    }

    async fn predict(&self, body: Value) -> Result<Value, LLMError> {
        self.upstream.post_json(&body, &self.default_model).await
    }

    fn models(&self) -> Vec<String> {
        vec![self.default_model.clone()]
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        self.upstream.check_reachable().await
    }
}
