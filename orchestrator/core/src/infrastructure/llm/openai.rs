// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// OpenAI-compatible Model Gateway
//
// Anti-Corruption Layer for OpenAI-style chat completion APIs (vLLM, the
// self-hosted gpt-oss server, hosted OpenAI-compatible endpoints). The wire
// types here are also the canonical shape the prediction adapter maps to.

use super::upstream::UpstreamClient;
use crate::domain::llm::{
    ChatCompletion, ChatMessage, ChatRequest, FinishReason, LLMError, ModelGateway, Role, TokenUsage,
};
use crate::domain::mcp::{ToolCall, ToolDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// A JSON-encoded string on the wire; some servers send an object.
    #[serde(default)]
    arguments: Value,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

fn function_type() -> String {
    "function".to_string()
}

fn to_wire_message(message: &ChatMessage) -> WireMessage {
    WireMessage {
        role: message.role,
        content: Some(message.content.clone()),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                kind: function_type(),
                function: WireFunctionCall {
                    name: call.name.clone(),
                    arguments: Value::String(call.arguments.to_string()),
                },
            })
            .collect(),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn to_wire_tool(tool: &ToolDescriptor) -> WireTool {
    WireTool {
        kind: "function",
        function: WireFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        },
    }
}

/// OpenAI chat completion body for a domain request.
pub(crate) fn request_body(request: &ChatRequest, default_model: &str) -> Value {
    let body = WireRequest {
        model: request.model.as_deref().unwrap_or(default_model),
        messages: request.messages.iter().map(to_wire_message).collect(),
        tools: request.tools.iter().map(to_wire_tool).collect(),
        tool_choice: if request.tools.is_empty() { None } else { Some("auto") },
        max_tokens: request.options.max_tokens,
        temperature: request.options.temperature,
    };
    serde_json::to_value(body).unwrap_or_else(|_| json!({}))
}

fn parse_arguments(raw: Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Value::Null => json!({}),
        other => other,
    }
}

/// Parse an OpenAI `chat.completion` object.
pub(crate) fn parse_completion(value: Value, default_model: &str) -> Result<ChatCompletion, LLMError> {
    let response: WireResponse = serde_json::from_value(value)
        .map_err(|e| LLMError::Provider(format!("Failed to parse response: {}", e)))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::Provider("No response from model".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| ToolCall {
            id: if call.id.is_empty() { format!("call_{index}") } else { call.id },
            name: call.function.name,
            arguments: parse_arguments(call.function.arguments),
        })
        .collect::<Vec<_>>();

    let finish_reason = if tool_calls.is_empty() {
        FinishReason::parse(choice.finish_reason.as_deref())
    } else {
        FinishReason::ToolCalls
    };

    Ok(ChatCompletion {
        id: response.id,
        model: response.model.unwrap_or_else(|| default_model.to_string()),
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: response.usage.unwrap_or_default(),
        finish_reason,
    })
}

/// Fill in the default model when the body carries none.
pub(crate) fn with_default_model(mut body: Value, default_model: &str) -> Value {
    if let Value::Object(map) = &mut body {
        let missing = match map.get("model") {
            Some(Value::String(m)) => m.trim().is_empty(),
            _ => true,
        };
        if missing {
            map.insert("model".to_string(), Value::String(default_model.to_string()));
        }
    }
    body
}

pub struct OpenAiCompatibleGateway {
    upstream: UpstreamClient,
    default_model: String,
}

impl OpenAiCompatibleGateway {
    pub fn new(upstream: UpstreamClient, default_model: String) -> Self {
        Self {
            upstream,
            default_model,
        }
    }
}

#[async_trait]
impl ModelGateway for OpenAiCompatibleGateway {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LLMError> {
        let body = request_body(request, &self.default_model);
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let response = self.upstream.post_json(&body, model).await?;
        parse_completion(response, model)
    }

    async fn passthrough(&self, body: Value) -> Result<Value, LLMError> {
        let mut body = with_default_model(body, &self.default_model);
        // Streaming is re-synthesised by the proxy from the full answer.
        if let Value::Object(map) = &mut body {
            map.remove("stream");
        }
        let model = body["model"].as_str().unwrap_or(&self.default_model).to_string();
        self.upstream.post_json(&body, &model).await
    }

    fn models(&self) -> Vec<String> {
        vec![self.default_model.clone()]
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        self.upstream.check_reachable().await
    }
}
