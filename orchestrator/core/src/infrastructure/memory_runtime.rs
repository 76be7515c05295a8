// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! In-memory container runtime.
//!
//! Keeps containers in a map instead of talking to a Docker daemon. Used by
//! tests and by `gopilot serve --runtime memory` for local development where
//! the worker runs outside Docker.

use crate::domain::container::{ContainerError, ContainerRuntime, ContainerSpec, RuntimeContainer};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct InMemoryContainerRuntime {
    containers: RwLock<HashMap<String, RuntimeContainer>>,
    creates: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_starts: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing container, as if created outside this process.
    pub fn seed(&self, container: RuntimeContainer) {
        self.containers.write().insert(container.name.clone(), container);
    }

    pub fn set_fail_starts(&self, fail: bool) {
        self.fail_starts.store(fail, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.containers.read().get(name).is_some_and(|c| c.running)
    }

    fn check_available(&self) -> Result<(), ContainerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ContainerError::Unavailable("runtime marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryContainerRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeContainer>, ContainerError> {
        self.check_available()?;
        Ok(self.containers.read().get(name).cloned())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        self.check_available()?;
        let id = format!("mem-{}", uuid::Uuid::new_v4().simple());
        self.containers.write().insert(
            spec.name.clone(),
            RuntimeContainer {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: false,
                labels: spec.labels.clone(),
            },
        );
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        self.check_available()?;
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(ContainerError::StartFailed(format!("start {id}: simulated failure")));
        }
        let mut containers = self.containers.write();
        let container = containers
            .values_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.running = true;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        self.check_available()?;
        let mut containers = self.containers.write();
        let container = containers
            .values_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.running = false;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<RuntimeContainer>, ContainerError> {
        self.check_available()?;
        Ok(self
            .containers
            .read()
            .values()
            .filter(|c| c.labels.get(crate::domain::container::MANAGED_LABEL).map(String::as_str) == Some("true"))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), ContainerError> {
        self.check_available()
    }
}
