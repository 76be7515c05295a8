// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration
//
// Defines the configuration schema for the gopilot orchestrator:
// - HTTP surface (bind address, CORS origin, optional JWT auth)
// - Deployment identity (project, region, bucket)
// - Workspace container settings (image, network, limits, idle scale-down)
// - Model gateway upstream selection and auth
// - External tool servers for the task dispatcher
//
// Values come from a YAML file (discovered or explicit) and are then
// overridden by the environment, so container deployments can be configured
// with env vars alone.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::container::ResourceLimits;
use crate::domain::mcp::{ToolServerConfig, ToolTransport};

pub const CONFIG_PATH_ENV: &str = "GOPILOT_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = "gopilot-config.yaml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("containers.image resolves to an empty image name")]
    EmptyImage,
    #[error("model.max_rounds must be at least 1")]
    ZeroRounds,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("tool server entry is invalid: {0}")]
    InvalidToolServer(String),
    #[error("duplicate tool server name: {0}")]
    DuplicateToolServer(String),
    #[error("loopback upstream is not allowed: {0}")]
    LoopbackUpstream(String),
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{0} is required for the selected upstream auth mode")]
    MissingCredential(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub containers: ContainerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Permit localhost upstreams (development only).
    #[serde(default)]
    pub allow_loopback_upstreams: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Public base URL of this service (`DOMAIN_SERVER`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Single CORS origin allowed to call the API (`DOMAIN_CLIENT`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_origin: Option<String>,
    /// HS256 secret; when set, API routes require a bearer JWT.
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
            public_url: None,
            allowed_origin: None,
            jwt_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_project_id")]
    pub project_id: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_gcs_bucket")]
    pub gcs_bucket: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            region: default_region(),
            gcs_bucket: default_gcs_bucket(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Agent image; defaults to `gcr.io/<project_id>/agent:latest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Docker network shared by the orchestrator and workspace containers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_socket_path: Option<String>,
    #[serde(default = "default_worker_port")]
    pub worker_port: u16,
    /// Fixed worker URL used for every workspace instead of the container
    /// name. For running against a locally started `gopilot-worker`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub autopull: bool,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(default = "default_reap_interval", with = "humantime_serde")]
    pub reap_interval: Duration,
    #[serde(default = "default_startup_timeout", with = "humantime_serde")]
    pub startup_timeout: Duration,
    /// How long a task waits for the worker to finish cloning and installing.
    #[serde(default = "default_ready_timeout", with = "humantime_serde")]
    pub ready_timeout: Duration,
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: None,
            network: None,
            docker_socket_path: None,
            worker_port: default_worker_port(),
            worker_endpoint: None,
            autopull: true,
            resources: ResourceLimits::default(),
            idle_timeout: default_idle_timeout(),
            reap_interval: default_reap_interval(),
            startup_timeout: default_startup_timeout(),
            ready_timeout: default_ready_timeout(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamAuth {
    #[default]
    Bearer,
    Gcloud,
    None,
}

impl UpstreamAuth {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "bearer" => Some(UpstreamAuth::Bearer),
            "gcloud" => Some(UpstreamAuth::Gcloud),
            "none" => Some(UpstreamAuth::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Managed prediction endpoint; takes precedence when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict_url: Option<String>,
    /// Full OpenAI-compatible chat completions URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_completions_url: Option<String>,
    /// Base URL; `/v1/chat/completions` is appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    /// Self-hosted model server used when nothing else is configured.
    #[serde(default = "default_gpt_oss_url")]
    pub gpt_oss_url: String,
    #[serde(default)]
    pub auth: UpstreamAuth,
    /// Upstream bearer key (`UPSTREAM_API_KEY`).
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Shared model key forwarded into workspace containers (`LLM_API_KEY`).
    #[serde(default, skip_serializing)]
    pub llm_api_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub google_access_token: Option<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_model_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            predict_url: None,
            chat_completions_url: None,
            api_base_url: None,
            gpt_oss_url: default_gpt_oss_url(),
            auth: UpstreamAuth::default(),
            api_key: None,
            llm_api_key: None,
            google_access_token: None,
            default_model: default_model(),
            timeout: default_model_timeout(),
            max_rounds: default_max_rounds(),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub servers: Vec<ToolServerConfig>,
    /// Per-call limit for external tool servers.
    #[serde(default = "default_tool_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Per-call limit for the workspace worker; covers its default command timeout.
    #[serde(default = "default_workspace_tool_timeout", with = "humantime_serde")]
    pub workspace_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            timeout: default_tool_timeout(),
            workspace_timeout: default_workspace_tool_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover a configuration file using precedence order
    /// 1. GOPILOT_CONFIG_PATH environment variable
    /// 2. ./gopilot-config.yaml (working directory)
    /// 3. ~/.gopilot/config.yaml (user home)
    /// 4. /etc/gopilot/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from(format!("./{CONFIG_FILE_NAME}"));
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gopilot").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/gopilot/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to defaults, then apply env overrides.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else {
            tracing::info!("No configuration file found in standard locations, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source. Empty values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("PROJECT_ID") {
            self.deployment.project_id = v;
        }
        if let Some(v) = get("REGION") {
            self.deployment.region = v;
        }
        if let Some(v) = get("GCS_BUCKET") {
            self.deployment.gcs_bucket = v;
        }
        if let Some(v) = get("DOMAIN_SERVER") {
            self.server.public_url = Some(v);
        }
        if let Some(v) = get("DOMAIN_CLIENT") {
            self.server.allowed_origin = Some(v);
        }
        if let Some(v) = get("JWT_SECRET") {
            self.server.jwt_secret = Some(v);
        }
        if let Some(v) = get("GOPILOT_BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(v) = get("PORT").or_else(|| get("GOPILOT_PORT")) {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid port override: '{}'", v),
            }
        }

        if let Some(v) = get("LLM_API_KEY") {
            self.model.llm_api_key = Some(v);
        }
        if let Some(v) = get("GPT_OSS_URL") {
            self.model.gpt_oss_url = v;
        }
        if let Some(v) = get("UPSTREAM_PREDICT_URL") {
            self.model.predict_url = Some(v);
        }
        if let Some(v) = get("UPSTREAM_CHAT_COMPLETIONS_URL") {
            self.model.chat_completions_url = Some(v);
        }
        if let Some(v) = get("UPSTREAM_API_BASE_URL") {
            self.model.api_base_url = Some(v);
        }
        if let Some(v) = get("UPSTREAM_API_KEY") {
            self.model.api_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_ACCESS_TOKEN") {
            self.model.google_access_token = Some(v);
        }
        if let Some(v) = get("UPSTREAM_DEFAULT_MODEL") {
            self.model.default_model = v;
        }
        if let Some(v) = get("UPSTREAM_AUTH") {
            match UpstreamAuth::parse(&v) {
                Some(auth) => self.model.auth = auth,
                None => tracing::warn!("Ignoring invalid UPSTREAM_AUTH value: '{}'", v),
            }
        }
        if let Some(v) = get("GOPILOT_MAX_ROUNDS") {
            match v.parse() {
                Ok(rounds) => self.model.max_rounds = rounds,
                Err(_) => tracing::warn!("Ignoring invalid GOPILOT_MAX_ROUNDS: '{}'", v),
            }
        }

        if let Some(v) = get("GOPILOT_AGENT_IMAGE") {
            self.containers.image = Some(v);
        }
        if let Some(v) = get("GOPILOT_DOCKER_NETWORK") {
            self.containers.network = Some(v);
        }
        if let Some(v) = get("GOPILOT_WORKER_ENDPOINT") {
            self.containers.worker_endpoint = Some(v);
        }
        if let Some(v) = get("GOPILOT_IDLE_TIMEOUT") {
            match humantime_serde::re::humantime::parse_duration(&v) {
                Ok(d) => self.containers.idle_timeout = d,
                Err(e) => tracing::warn!("Ignoring invalid GOPILOT_IDLE_TIMEOUT '{}': {}", v, e),
            }
        }

        if let Some(url) = get("GENAI_TOOLBOX_URL") {
            match self.tools.servers.iter_mut().find(|s| s.name == "toolbox") {
                Some(existing) => existing.url = url,
                None => self.tools.servers.push(ToolServerConfig {
                    name: "toolbox".to_string(),
                    url,
                    transport: ToolTransport::Toolbox,
                }),
            }
        }

        if let Some(v) = get("GOPILOT_ALLOW_LOOPBACK") {
            self.allow_loopback_upstreams = matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
        }
    }

    /// Image used for new workspace containers.
    pub fn agent_image(&self) -> String {
        self.containers
            .image
            .clone()
            .unwrap_or_else(|| format!("gcr.io/{}/agent:latest", self.deployment.project_id))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_image().trim().is_empty() {
            return Err(ConfigError::EmptyImage);
        }
        if self.model.max_rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.containers.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("containers.idle_timeout"));
        }
        if self.containers.reap_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("containers.reap_interval"));
        }
        if self.containers.ready_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("containers.ready_timeout"));
        }
        if self.tools.timeout.is_zero() || self.tools.workspace_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("tools.timeout"));
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.tools.servers {
            if server.name.trim().is_empty() || server.url.trim().is_empty() {
                return Err(ConfigError::InvalidToolServer(format!(
                    "name='{}' url='{}'",
                    server.name, server.url
                )));
            }
            if server.name == crate::application::task_dispatcher::WORKSPACE_SERVER {
                return Err(ConfigError::InvalidToolServer(format!(
                    "'{}' is reserved for the workspace worker",
                    server.name
                )));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateToolServer(server.name.clone()));
            }
            self.check_upstream(&server.url)?;
        }

        for url in [
            self.model.predict_url.as_deref(),
            self.model.chat_completions_url.as_deref(),
            self.model.api_base_url.as_deref(),
            Some(self.model.gpt_oss_url.as_str()),
        ]
        .into_iter()
        .flatten()
        {
            self.check_upstream(url)?;
        }

        Ok(())
    }

    /// Reject malformed or (unless allowed) loopback upstream URLs.
    pub fn check_upstream(&self, raw: &str) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        if !self.allow_loopback_upstreams && is_loopback(&parsed) {
            return Err(ConfigError::LoopbackUpstream(raw.to_string()));
        }
        Ok(())
    }
}

pub fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_project_id() -> String {
    "ai-agent-project".to_string()
}

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_gcs_bucket() -> String {
    "ai-agent-repos".to_string()
}

fn default_worker_port() -> u16 {
    8081
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_reap_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(20 * 60)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_gpt_oss_url() -> String {
    "http://gpt-oss:8000/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "openai/gpt-oss-120b-maas".to_string()
}

fn default_model_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_rounds() -> u32 {
    8
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_workspace_tool_timeout() -> Duration {
    Duration::from_secs(330)
}
