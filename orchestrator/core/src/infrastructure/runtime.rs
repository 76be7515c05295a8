// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::container::{
    ContainerError, ContainerRuntime, ContainerSpec, RuntimeContainer, MANAGED_LABEL,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Docker Engine adapter for workspace containers.
pub struct DockerContainerRuntime {
    docker: Docker,
    stop_timeout: Duration,
}

impl DockerContainerRuntime {
    pub fn new(socket_path: Option<String>, stop_timeout: Duration) -> Result<Self, ContainerError> {
        let docker = if let Some(path) = socket_path {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(&path, 120, bollard::API_DEFAULT_VERSION);

            result.map_err(|e| {
                ContainerError::Unavailable(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                ContainerError::Unavailable(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Check that the daemon is running (docker ps) and that this \
                     process can read /var/run/docker.sock.",
                    e
                ))
            })?
        };

        Ok(Self {
            docker,
            stop_timeout,
        })
    }

    async fn ensure_image(&self, image: &str, autopull: bool) -> Result<(), ContainerError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        if !autopull {
            return Err(ContainerError::StartFailed(format!(
                "Image {} not found locally and autopull is disabled",
                image
            )));
        }

        info!("Pulling image: {}", image);
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(ContainerError::StartFailed(format!(
                    "Failed to pull image {}: {}\n\nTry manually: docker pull {}",
                    image, e, image
                )));
            }
        }
        info!("Successfully pulled image: {}", image);
        Ok(())
    }
}

fn is_not_found(e: &DockerError) -> bool {
    matches!(e, DockerError::DockerResponseServerError { status_code: 404, .. })
}

/// Docker reports names with a leading slash.
fn trim_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

pub(crate) fn host_config(spec: &ContainerSpec) -> HostConfig {
    HostConfig {
        binds: if spec.binds.is_empty() {
            None
        } else {
            Some(spec.binds.clone())
        },
        network_mode: spec.network.clone(),
        memory: spec.resources.memory(),
        nano_cpus: spec.resources.nano_cpus(),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
            maximum_retry_count: None,
        }),
        ..Default::default()
    }
}

pub(crate) fn env_list(env: &HashMap<String, String>) -> Vec<String> {
    let mut vars: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    vars.sort();
    vars
}

#[async_trait]
impl ContainerRuntime for DockerContainerRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeContainer>, ContainerError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => {
                let config = details.config.unwrap_or_default();
                Ok(Some(RuntimeContainer {
                    id: details.id.unwrap_or_default(),
                    name: details.name.map(|n| trim_name(&n)).unwrap_or_else(|| name.to_string()),
                    image: config.image.unwrap_or_default(),
                    running: details.state.and_then(|s| s.running).unwrap_or(false),
                    labels: config.labels.unwrap_or_default(),
                }))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(ContainerError::Unavailable(e.to_string())),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        self.ensure_image(&spec.image, spec.autopull).await?;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env_list(&spec.env)),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config(spec)),
            ..Default::default()
        };

        let res = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ContainerError::StartFailed(format!("create {}: {}", spec.name, e)))?;

        debug!("Created container {} ({})", spec.name, res.id);
        Ok(res.id)
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::StartFailed(format!("start {}: {}", id, e)))?;
        info!("Started container: {}", id);
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        let options = StopContainerOptions {
            t: self.stop_timeout.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => {
                info!("Stopped container: {}", id);
                Ok(())
            }
            // 304: already stopped
            Err(DockerError::DockerResponseServerError { status_code: 304, .. }) => Ok(()),
            Err(e) if is_not_found(&e) => Err(ContainerError::NotFound(id.to_string())),
            Err(e) => Err(ContainerError::StopFailed(e.to_string())),
        }
    }

    async fn list_managed(&self) -> Result<Vec<RuntimeContainer>, ContainerError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ContainerError::Unavailable(e.to_string()))?;

        Ok(summaries
            .into_iter()
            .map(|s| RuntimeContainer {
                id: s.id.unwrap_or_default(),
                name: s
                    .names
                    .and_then(|names| names.first().map(|n| trim_name(n)))
                    .unwrap_or_default(),
                image: s.image.unwrap_or_default(),
                running: s.state.as_deref() == Some("running"),
                labels: s.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), ContainerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::Unavailable(format!("Cannot connect to Docker daemon: {}", e)))?;
        Ok(())
    }
}
