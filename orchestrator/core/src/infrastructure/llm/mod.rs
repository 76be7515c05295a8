// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// Model Gateway adapters
//
// Each adapter translates between the domain `ModelGateway` contract and one
// upstream API family. `build_gateway` picks the adapter from configuration.

pub mod openai;
pub mod upstream;
pub mod vertex;

use std::sync::Arc;
use tracing::info;

use crate::domain::config::OrchestratorConfig;
use crate::domain::llm::ModelGateway;
use openai::OpenAiCompatibleGateway;
use upstream::{UpstreamClient, UpstreamMode, UpstreamTarget};
use vertex::VertexPredictGateway;

pub fn build_gateway(config: &OrchestratorConfig) -> anyhow::Result<Arc<dyn ModelGateway>> {
    let target = UpstreamTarget::resolve(config)?;
    let http = reqwest::Client::builder().timeout(config.model.timeout).build()?;
    let default_model = config.model.default_model.clone();

    info!(url = %target.url, mode = ?target.mode, model = %default_model, "Configured model upstream");
    let mode = target.mode;
    let upstream = UpstreamClient::new(http, target);
    Ok(match mode {
        UpstreamMode::ChatCompletions => Arc::new(OpenAiCompatibleGateway::new(upstream, default_model)),
        UpstreamMode::Predict => Arc::new(VertexPredictGateway::new(upstream, default_model)),
    })
}
