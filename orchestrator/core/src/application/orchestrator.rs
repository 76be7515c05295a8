// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator
//!
//! Application service behind `POST /orchestrate`: resolves the workspace,
//! leases its container, then alternates model rounds and tool dispatch
//! until the model answers without tool calls.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Task lifecycle and the iterative tool-use loop

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::container_lifecycle::ContainerLifecycleManager;
use crate::application::task_dispatcher::TaskDispatcher;
use crate::domain::config::OrchestratorConfig;
use crate::domain::events::TaskEvent;
use crate::domain::llm::{ChatMessage, ChatRequest, GenerationOptions, LLMError, ModelGateway, TokenUsage};
use crate::domain::task::{OrchestrationResult, TaskId, TaskRequest};
use crate::domain::workspace::WorkspaceId;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Container unavailable: {0}")]
    ContainerStart(String),

    #[error("Model gateway error: {0}")]
    Gateway(#[from] LLMError),

    #[error("No final answer after {0} rounds")]
    RoundLimitExceeded(u32),
}

impl OrchestrationError {
    fn outcome_label(&self) -> &'static str {
        match self {
            OrchestrationError::InvalidRequest(_) => "invalid_request",
            OrchestrationError::NotFound(_) => "not_found",
            OrchestrationError::ContainerStart(_) => "container_start",
            OrchestrationError::Gateway(_) => "gateway",
            OrchestrationError::RoundLimitExceeded(_) => "round_limit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_rounds: u32,
    pub startup_timeout: Duration,
    pub ready_timeout: Duration,
    pub options: GenerationOptions,
}

impl OrchestratorSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let defaults = GenerationOptions::default();
        Self {
            max_rounds: config.model.max_rounds,
            startup_timeout: config.containers.startup_timeout,
            ready_timeout: config.containers.ready_timeout,
            options: GenerationOptions {
                max_tokens: config.model.max_tokens.or(defaults.max_tokens),
                temperature: config.model.temperature.or(defaults.temperature),
            },
        }
    }
}

fn system_instruction(workspace: &WorkspaceId, repo_url: Option<&str>) -> String {
    let subject = match repo_url {
        Some(url) => format!("a checkout of {url}"),
        None => "an empty scratch directory".to_string(),
    };
    format!(
        "You are gopilot, a software engineering agent. You work inside the isolated \
         container of workspace '{workspace}', whose /workspace directory holds {subject}. \
         Use the available tools to inspect files, edit them and run commands. Call tools \
         only when they help; when the task is done, reply with the final answer and no tool calls."
    )
}

pub struct Orchestrator {
    lifecycle: Arc<ContainerLifecycleManager>,
    dispatcher: Arc<TaskDispatcher>,
    gateway: Arc<dyn ModelGateway>,
    event_bus: EventBus,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        lifecycle: Arc<ContainerLifecycleManager>,
        dispatcher: Arc<TaskDispatcher>,
        gateway: Arc<dyn ModelGateway>,
        event_bus: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            lifecycle,
            dispatcher,
            gateway,
            event_bus,
            settings,
        }
    }

    pub fn lifecycle(&self) -> &Arc<ContainerLifecycleManager> {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.gateway
    }

    pub async fn orchestrate(&self, request: TaskRequest) -> Result<OrchestrationResult, OrchestrationError> {
        let task_id = TaskId::new();
        let outcome = self.run(task_id, &request).await;

        match &outcome {
            Ok(result) => {
                metrics::counter!("gopilot_orchestrations_total", "outcome" => "success").increment(1);
                info!(%task_id, workspace_id = %result.workspace_id, rounds = result.rounds, "Task completed");
                self.event_bus.publish_task_event(TaskEvent::TaskCompleted {
                    task_id,
                    workspace_id: result.workspace_id.clone(),
                    rounds: result.rounds,
                    completed_at: Utc::now(),
                });
            }
            Err(e) => {
                metrics::counter!("gopilot_orchestrations_total", "outcome" => e.outcome_label()).increment(1);
                warn!(%task_id, error = %e, "Task failed");
                let workspace_id =
                    WorkspaceId::resolve(request.workspace_id.as_deref(), request.repo_url.as_deref()).ok();
                self.event_bus.publish_task_event(TaskEvent::TaskFailed {
                    task_id,
                    workspace_id,
                    reason: e.to_string(),
                    failed_at: Utc::now(),
                });
            }
        }
        outcome
    }

    async fn run(&self, task_id: TaskId, request: &TaskRequest) -> Result<OrchestrationResult, OrchestrationError> {
        if request.query.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest("query must not be empty".into()));
        }
        let repo_url = request.repository().map_err(OrchestrationError::InvalidRequest)?;
        let workspace = WorkspaceId::resolve(request.workspace_id.as_deref(), repo_url)
            .map_err(|e| OrchestrationError::InvalidRequest(e.to_string()))?;

        info!(%task_id, workspace_id = %workspace, "Task accepted");
        self.event_bus.publish_task_event(TaskEvent::TaskAccepted {
            task_id,
            workspace_id: workspace.clone(),
            accepted_at: Utc::now(),
        });

        // Held until this function returns, on every path.
        let lease = self
            .lifecycle
            .acquire(&workspace, repo_url)
            .await
            .map_err(|e| OrchestrationError::ContainerStart(e.to_string()))?;
        let endpoint = lease.endpoint().to_string();

        self.dispatcher
            .wait_for_worker(&endpoint, self.settings.startup_timeout)
            .await
            .map_err(|e| OrchestrationError::ContainerStart(e.to_string()))?;
        self.dispatcher
            .wait_for_workspace(&endpoint, self.settings.ready_timeout)
            .await
            .map_err(|e| OrchestrationError::ContainerStart(e.to_string()))?;

        let catalogue = self.dispatcher.catalogue(Some(&endpoint)).await;

        let mut chat = ChatRequest {
            model: None,
            messages: vec![
                ChatMessage::system(system_instruction(&workspace, repo_url)),
                ChatMessage::user(request.prompt()),
            ],
            tools: catalogue.clone(),
            options: self.settings.options.clone(),
        };

        let mut usage = TokenUsage::default();
        let mut tool_results = Vec::new();

        for round in 1..=self.settings.max_rounds {
            let completion = self.gateway.complete(&chat).await?;
            usage.accumulate(completion.usage);

            if completion.tool_calls.is_empty() {
                return Ok(OrchestrationResult {
                    task_id,
                    status: "success".to_string(),
                    workspace_id: workspace,
                    container_id: lease.container_id().to_string(),
                    response: completion.content,
                    tool_results,
                    rounds: round,
                    usage,
                });
            }

            info!(%task_id, round, calls = completion.tool_calls.len(), "Dispatching tool calls");
            let results = join_all(
                completion
                    .tool_calls
                    .iter()
                    .map(|call| self.dispatcher.dispatch(call, &catalogue, Some(&endpoint))),
            )
            .await;

            chat.messages
                .push(ChatMessage::assistant(completion.content, completion.tool_calls));
            for result in &results {
                self.event_bus.publish_task_event(TaskEvent::ToolDispatched {
                    task_id,
                    call_id: result.call_id.clone(),
                    tool: result.tool.clone(),
                    server: result.server.clone(),
                    is_error: result.is_error,
                    duration_ms: result.duration_ms,
                });
                chat.messages
                    .push(ChatMessage::tool(result.call_id.clone(), result.to_model_content()));
            }
            tool_results.extend(results);
        }

        Err(OrchestrationError::RoundLimitExceeded(self.settings.max_rounds))
    }
}
