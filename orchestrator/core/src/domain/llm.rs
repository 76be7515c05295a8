// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Llm
//!
//! Domain interface for the Model Gateway. Isolates the orchestration loop
//! from vendor chat-completion APIs; adapters live in `infrastructure::llm`.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Model gateway contract and chat value objects

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::mcp::{ToolCall, ToolDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls issued in an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model override; the gateway's default when `None`.
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("length") => FinishReason::Length,
            Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub id: Option<String>,
    pub model: String,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Model Gateway: forwards prompts and tool availability to a language model backend.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LLMError>;

    /// Forward an OpenAI-shaped chat completion body and return an
    /// OpenAI-shaped `chat.completion` object.
    async fn passthrough(&self, body: serde_json::Value) -> Result<serde_json::Value, LLMError>;

    /// Forward a raw body to the managed prediction endpoint unchanged.
    ///
    /// Only gateways backed by a prediction endpoint support this.
    async fn predict(&self, _body: serde_json::Value) -> Result<serde_json::Value, LLMError> {
        Err(LLMError::NotConfigured("no prediction endpoint is configured".into()))
    }

    /// Model identifiers served by this gateway.
    fn models(&self) -> Vec<String>;

    async fn health_check(&self) -> Result<(), LLMError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl LLMError {
    /// Classify a non-success upstream status.
    pub fn from_status(status: u16, body: String, model: &str) -> Self {
        match status {
            401 | 403 => LLMError::Authentication(body),
            429 => LLMError::RateLimit,
            404 => LLMError::ModelNotFound(model.to_string()),
            _ => LLMError::Provider(format!("HTTP {status}: {body}")),
        }
    }
}
