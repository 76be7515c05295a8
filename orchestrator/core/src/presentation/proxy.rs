// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// OpenAI-compatible proxy
//
// `/v1/models` and `/v1/chat/completions` for IDE clients. Requests go to the
// upstream through the Model Gateway in non-streaming mode; when the client
// asked for `stream: true` the full answer is replayed as SSE chunks.
// `/vertex/predict` forwards raw prediction bodies untouched.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use futures::stream;
use serde_json::{json, Value};
use std::convert::Infallible;

use super::api::{ApiError, AppState};

const MIN_CHUNK_CHARS: usize = 20;
const TARGET_CHUNKS: usize = 20;

pub(crate) async fn list_models_handler(State(state): State<AppState>) -> Json<Value> {
    let created = Utc::now().timestamp();
    let data: Vec<Value> = state
        .orchestrator
        .gateway()
        .models()
        .into_iter()
        .map(|id| json!({"id": id, "object": "model", "created": created, "owned_by": "gopilot"}))
        .collect();
    Json(json!({"object": "list", "data": data}))
}

pub(crate) async fn chat_completions_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    if !body.get("messages").is_some_and(Value::is_array) {
        return Err(ApiError::bad_request("messages must be an array"));
    }
    let stream_requested = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let completion = state.orchestrator.gateway().passthrough(body).await?;
    if !stream_requested {
        return Ok(Json(completion).into_response());
    }

    let events = stream_events(&completion)
        .into_iter()
        .map(|data| Ok::<_, Infallible>(Event::default().data(data)));
    Ok(Sse::new(stream::iter(events)).into_response())
}

pub(crate) async fn vertex_predict_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    if !body.is_object() {
        return Err(ApiError::bad_request("prediction body must be a JSON object"));
    }
    let response = state.orchestrator.gateway().predict(body).await?;
    Ok(Json(response))
}

/// Split `content` into pieces of `max(20, chars / 20)` characters.
pub(crate) fn chunk_content(content: &str) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let size = (chars.len() / TARGET_CHUNKS).max(MIN_CHUNK_CHARS);
    chars.chunks(size).map(|chunk| chunk.iter().collect()).collect()
}

/// SSE `data:` payloads replaying a full `chat.completion` as `chat.completion.chunk`s.
pub(crate) fn stream_events(completion: &Value) -> Vec<String> {
    let id = completion.get("id").and_then(Value::as_str).unwrap_or("chatcmpl");
    let model = completion.get("model").cloned().unwrap_or(Value::Null);
    let created = completion
        .get("created")
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| json!(Utc::now().timestamp()));
    let choice = &completion["choices"][0];
    let content = choice["message"]["content"].as_str().unwrap_or_default();
    let finish_reason = choice
        .get("finish_reason")
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| json!("stop"));

    let chunk = |delta: Value, finish: Value| {
        json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}],
        })
        .to_string()
    };

    let mut events = vec![chunk(json!({"role": "assistant"}), Value::Null)];
    events.extend(
        chunk_content(content)
            .into_iter()
            .map(|piece| chunk(json!({"content": piece}), Value::Null)),
    );
    if let Some(tool_calls) = choice["message"].get("tool_calls").filter(|v| v.is_array()) {
        events.push(chunk(json!({"tool_calls": tool_calls}), Value::Null));
    }
    events.push(chunk(json!({}), finish_reason));
    events.push("[DONE]".to_string());
    events
}
