// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Container Lifecycle
//!
//! Starts, reuses and stops the per-workspace agent containers.
//!
//! Each workspace maps to at most one container named `gopilot-<workspace>`.
//! Tasks hold a [`ContainerLease`] for as long as they use the container; the
//! container is `running` while any lease is held and `idle` afterwards. A
//! background reaper stops containers that stay idle past `idle_timeout`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Container reuse, RAII leases and idle scale-down

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::OrchestratorConfig;
use crate::domain::container::{
    ContainerError, ContainerRecord, ContainerRuntime, ContainerSpec, ContainerStatus,
    ResourceLimits, RuntimeContainer, MANAGED_LABEL, REGION_LABEL, WORKSPACE_LABEL,
};
use crate::domain::events::ContainerEvent;
use crate::domain::workspace::WorkspaceId;
use crate::infrastructure::event_bus::EventBus;

/// Mount point of the workspace volume inside the container.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Container settings derived from the orchestrator configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub image: String,
    pub region: String,
    pub gcs_bucket: String,
    pub llm_api_key: Option<String>,
    pub gpt_oss_url: String,
    pub network: Option<String>,
    pub worker_port: u16,
    pub worker_endpoint: Option<String>,
    pub resources: ResourceLimits,
    pub autopull: bool,
    pub idle_timeout: Duration,
}

impl LifecycleSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            image: config.agent_image(),
            region: config.deployment.region.clone(),
            gcs_bucket: config.deployment.gcs_bucket.clone(),
            llm_api_key: config.model.llm_api_key.clone(),
            gpt_oss_url: config.model.gpt_oss_url.clone(),
            network: config.containers.network.clone(),
            worker_port: config.containers.worker_port,
            worker_endpoint: config.containers.worker_endpoint.clone(),
            resources: config.containers.resources.clone(),
            autopull: config.containers.autopull,
            idle_timeout: config.containers.idle_timeout,
        }
    }

    pub fn endpoint_for(&self, workspace: &WorkspaceId) -> String {
        match &self.worker_endpoint {
            Some(fixed) => fixed.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", workspace.container_name(), self.worker_port),
        }
    }

    pub fn container_spec(&self, workspace: &WorkspaceId, repo_url: Option<&str>) -> ContainerSpec {
        let mut env = HashMap::from([
            ("WORKSPACE_ID".to_string(), workspace.to_string()),
            ("GPT_OSS_URL".to_string(), self.gpt_oss_url.clone()),
            ("GCS_BUCKET".to_string(), self.gcs_bucket.clone()),
            ("GOPILOT_WORKER_PORT".to_string(), self.worker_port.to_string()),
        ]);
        if let Some(url) = repo_url {
            env.insert("REPO_URL".to_string(), url.to_string());
        }
        if let Some(key) = &self.llm_api_key {
            env.insert("LLM_API_KEY".to_string(), key.clone());
        }

        let labels = HashMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (WORKSPACE_LABEL.to_string(), workspace.to_string()),
            (REGION_LABEL.to_string(), self.region.clone()),
        ]);

        ContainerSpec {
            name: workspace.container_name(),
            image: self.image.clone(),
            env,
            labels,
            resources: self.resources.clone(),
            network: self.network.clone(),
            binds: vec![format!("{}:{}", workspace.volume_name(), WORKSPACE_MOUNT)],
            autopull: self.autopull,
        }
    }
}

/// In-memory index of workspace containers.
///
/// The lock is never held across an await point.
#[derive(Default)]
pub struct ContainerRegistry {
    records: RwLock<HashMap<WorkspaceId, ContainerRecord>>,
}

impl ContainerRegistry {
    pub fn get(&self, workspace: &WorkspaceId) -> Option<ContainerRecord> {
        self.records.read().get(workspace).cloned()
    }

    pub fn upsert(&self, record: ContainerRecord) {
        self.records.write().insert(record.workspace_id.clone(), record);
    }

    /// Insert `record` keeping the lease count of the record it replaces.
    ///
    /// Leases taken on an earlier container for the same workspace may still
    /// be outstanding; their drops must land on the replacement record.
    fn replace_keeping_leases(&self, mut record: ContainerRecord) -> ContainerRecord {
        let mut records = self.records.write();
        record.active_tasks = records
            .get(&record.workspace_id)
            .map(|r| r.active_tasks)
            .unwrap_or(0);
        records.insert(record.workspace_id.clone(), record.clone());
        record
    }

    /// Install a freshly started container together with a new lease on it.
    fn install_leased(&self, mut record: ContainerRecord) -> ContainerRecord {
        let mut records = self.records.write();
        let outstanding = records
            .get(&record.workspace_id)
            .map(|r| r.active_tasks)
            .unwrap_or(0);
        record.active_tasks = outstanding + 1;
        record.status = ContainerStatus::Running;
        records.insert(record.workspace_id.clone(), record.clone());
        record
    }

    pub fn remove(&self, workspace: &WorkspaceId) -> Option<ContainerRecord> {
        self.records.write().remove(workspace)
    }

    pub fn list(&self) -> Vec<ContainerRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Take a lease on a live record: bump the task count and mark it running.
    fn begin_lease(&self, workspace: &WorkspaceId, now: DateTime<Utc>) -> Option<ContainerRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(workspace)?;
        if !record.status.is_live() {
            return None;
        }
        record.active_tasks += 1;
        record.status = ContainerStatus::Running;
        record.last_used_at = now;
        Some(record.clone())
    }

    /// Release one lease. Returns true when the record just became idle.
    fn end_lease(&self, workspace: &WorkspaceId, now: DateTime<Utc>) -> bool {
        let mut records = self.records.write();
        let Some(record) = records.get_mut(workspace) else {
            return false;
        };
        record.active_tasks = record.active_tasks.saturating_sub(1);
        record.last_used_at = now;
        if record.active_tasks == 0 && record.status == ContainerStatus::Running {
            record.status = ContainerStatus::Idle;
            return true;
        }
        false
    }

    fn mark_stopped(&self, workspace: &WorkspaceId) -> Option<ContainerRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(workspace)?;
        record.status = ContainerStatus::Stopped;
        Some(record.clone())
    }

    /// Idle records whose last use is at least `idle_timeout` before `now`.
    fn idle_expired(&self, now: DateTime<Utc>, idle_timeout: Duration) -> Vec<WorkspaceId> {
        let timeout = chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::MAX);
        self.records
            .read()
            .values()
            .filter(|r| is_reapable(r, now, timeout))
            .map(|r| r.workspace_id.clone())
            .collect()
    }
}

fn is_reapable(record: &ContainerRecord, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
    record.status == ContainerStatus::Idle
        && record.active_tasks == 0
        && now.signed_duration_since(record.last_used_at) >= timeout
}

/// A task's claim on a workspace container. Released on drop.
pub struct ContainerLease {
    record: ContainerRecord,
    registry: Arc<ContainerRegistry>,
    event_bus: EventBus,
}

impl ContainerLease {
    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.record.workspace_id
    }

    pub fn container_id(&self) -> &str {
        &self.record.container_id
    }

    pub fn endpoint(&self) -> &str {
        &self.record.endpoint
    }

    /// Snapshot of the record at acquisition time.
    pub fn record(&self) -> &ContainerRecord {
        &self.record
    }
}

impl Drop for ContainerLease {
    fn drop(&mut self) {
        let now = Utc::now();
        metrics::gauge!("gopilot_active_leases").decrement(1.0);
        if self.registry.end_lease(&self.record.workspace_id, now) {
            debug!(workspace_id = %self.record.workspace_id, "Container is now idle");
            self.event_bus.publish_container_event(ContainerEvent::ContainerIdle {
                workspace_id: self.record.workspace_id.clone(),
                idle_since: now,
            });
        }
    }
}

pub struct ContainerLifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: LifecycleSettings,
    registry: Arc<ContainerRegistry>,
    locks: DashMap<WorkspaceId, Arc<Mutex<()>>>,
    event_bus: EventBus,
}

impl ContainerLifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: LifecycleSettings, event_bus: EventBus) -> Self {
        Self {
            runtime,
            settings,
            registry: Arc::new(ContainerRegistry::default()),
            locks: DashMap::new(),
            event_bus,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    pub async fn runtime_health(&self) -> Result<(), ContainerError> {
        self.runtime.ping().await
    }

    fn workspace_lock(&self, workspace: &WorkspaceId) -> Arc<Mutex<()>> {
        self.locks
            .entry(workspace.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn lease(&self, record: ContainerRecord) -> ContainerLease {
        metrics::gauge!("gopilot_active_leases").increment(1.0);
        ContainerLease {
            record,
            registry: self.registry.clone(),
            event_bus: self.event_bus.clone(),
        }
    }

    /// Obtain a running container for `workspace`, reusing one when possible.
    pub async fn acquire(
        &self,
        workspace: &WorkspaceId,
        repo_url: Option<&str>,
    ) -> Result<ContainerLease, ContainerError> {
        let lock = self.workspace_lock(workspace);
        let _guard = lock.lock().await;

        if let Some(existing) = self.registry.get(workspace) {
            if self.is_reusable(&existing).await {
                if let Some(record) = self.registry.begin_lease(workspace, Utc::now()) {
                    debug!(workspace_id = %workspace, container_id = %record.container_id, "Reusing container");
                    self.event_bus.publish_container_event(ContainerEvent::ContainerReused {
                        workspace_id: workspace.clone(),
                        container_id: record.container_id.clone(),
                        reused_at: Utc::now(),
                    });
                    return Ok(self.lease(record));
                }
            }
        }

        let repo_url = repo_url
            .map(str::to_string)
            .or_else(|| self.registry.get(workspace).and_then(|r| r.repo_url));

        match self.ensure_running(workspace, repo_url.as_deref()).await {
            Ok(record) => {
                let record = self.registry.install_leased(record);
                Ok(self.lease(record))
            }
            Err(e) => {
                self.registry.remove(workspace);
                warn!(workspace_id = %workspace, error = %e, "Failed to start workspace container");
                self.event_bus.publish_container_event(ContainerEvent::ContainerStartFailed {
                    workspace_id: workspace.clone(),
                    reason: e.to_string(),
                    failed_at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Running records are trusted; idle ones are checked against the runtime
    /// in case the container died while nobody was using it.
    async fn is_reusable(&self, record: &ContainerRecord) -> bool {
        match record.status {
            ContainerStatus::Running => true,
            ContainerStatus::Idle => match self.runtime.inspect(&record.container_name).await {
                Ok(Some(container)) => container.running && container.id == record.container_id,
                Ok(None) => false,
                Err(e) => {
                    warn!(workspace_id = %record.workspace_id, error = %e, "Could not verify idle container");
                    false
                }
            },
            ContainerStatus::Starting | ContainerStatus::Stopped => false,
        }
    }

    async fn ensure_running(
        &self,
        workspace: &WorkspaceId,
        repo_url: Option<&str>,
    ) -> Result<ContainerRecord, ContainerError> {
        let name = workspace.container_name();
        let now = Utc::now();
        self.registry.replace_keeping_leases(ContainerRecord {
            workspace_id: workspace.clone(),
            container_id: String::new(),
            container_name: name.clone(),
            endpoint: self.settings.endpoint_for(workspace),
            image: self.settings.image.clone(),
            repo_url: repo_url.map(str::to_string),
            status: ContainerStatus::Starting,
            resources: self.settings.resources.clone(),
            created_at: now,
            last_used_at: now,
            active_tasks: 0,
        });

        let (container_id, image, created) = match self.runtime.inspect(&name).await? {
            Some(existing) if existing.running => {
                info!(workspace_id = %workspace, container_id = %existing.id, "Adopting running container");
                (existing.id, existing.image, false)
            }
            Some(existing) => {
                info!(workspace_id = %workspace, container_id = %existing.id, "Starting stopped container");
                self.runtime.start(&existing.id).await?;
                metrics::counter!("gopilot_containers_started_total").increment(1);
                (existing.id, existing.image, false)
            }
            None => {
                let spec = self.settings.container_spec(workspace, repo_url);
                info!(workspace_id = %workspace, image = %spec.image, "Creating workspace container");
                let id = self.runtime.create(&spec).await?;
                self.runtime.start(&id).await?;
                metrics::counter!("gopilot_containers_started_total").increment(1);
                (id, spec.image, true)
            }
        };

        let started_at = Utc::now();
        self.event_bus.publish_container_event(ContainerEvent::ContainerStarted {
            workspace_id: workspace.clone(),
            container_id: container_id.clone(),
            created,
            started_at,
        });

        Ok(ContainerRecord {
            workspace_id: workspace.clone(),
            container_id,
            container_name: name,
            endpoint: self.settings.endpoint_for(workspace),
            image: if image.is_empty() { self.settings.image.clone() } else { image },
            repo_url: repo_url.map(str::to_string),
            status: ContainerStatus::Running,
            resources: self.settings.resources.clone(),
            created_at: now,
            last_used_at: started_at,
            active_tasks: 0,
        })
    }

    /// Stop the container for `workspace`.
    pub async fn stop(&self, workspace: &WorkspaceId) -> Result<ContainerRecord, ContainerError> {
        let result = {
            let lock = self.workspace_lock(workspace);
            let _guard = lock.lock().await;
            self.stop_locked(workspace, false).await
        };
        self.prune_lock(workspace);
        result
    }

    /// Drop the workspace mutex once nobody holds or waits on it.
    fn prune_lock(&self, workspace: &WorkspaceId) {
        self.locks.remove_if(workspace, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of per-workspace mutexes currently kept.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    async fn stop_locked(&self, workspace: &WorkspaceId, reaped: bool) -> Result<ContainerRecord, ContainerError> {
        let record = match self.registry.get(workspace) {
            Some(record) if !record.container_id.is_empty() => record,
            _ => {
                let container = self
                    .runtime
                    .inspect(&workspace.container_name())
                    .await?
                    .ok_or_else(|| ContainerError::NotFound(workspace.to_string()))?;
                let record = self.record_from_runtime(workspace.clone(), &container);
                self.registry.upsert(record.clone());
                record
            }
        };

        if record.status != ContainerStatus::Stopped {
            match self.runtime.stop(&record.container_id).await {
                Ok(()) => {}
                Err(ContainerError::NotFound(_)) => {
                    debug!(workspace_id = %workspace, "Container already removed")
                }
                Err(e) => return Err(e),
            }
        }

        let stopped = self.registry.mark_stopped(workspace).unwrap_or(ContainerRecord {
            status: ContainerStatus::Stopped,
            ..record
        });
        info!(workspace_id = %workspace, container_id = %stopped.container_id, reaped, "Stopped workspace container");
        self.event_bus.publish_container_event(ContainerEvent::ContainerStopped {
            workspace_id: workspace.clone(),
            container_id: stopped.container_id.clone(),
            reaped,
            stopped_at: Utc::now(),
        });
        Ok(stopped)
    }

    /// Registry records merged with managed containers the runtime knows about.
    pub async fn list(&self) -> Result<Vec<ContainerRecord>, ContainerError> {
        let mut merged: HashMap<WorkspaceId, ContainerRecord> = self
            .registry
            .list()
            .into_iter()
            .map(|r| (r.workspace_id.clone(), r))
            .collect();

        for container in self.runtime.list_managed().await? {
            let Some(workspace) = container.workspace_id() else {
                continue;
            };
            merged
                .entry(workspace.clone())
                .or_insert_with(|| self.record_from_runtime(workspace, &container));
        }

        let mut records: Vec<ContainerRecord> = merged.into_values().collect();
        records.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        Ok(records)
    }

    fn record_from_runtime(&self, workspace: WorkspaceId, container: &RuntimeContainer) -> ContainerRecord {
        let now = Utc::now();
        ContainerRecord {
            endpoint: self.settings.endpoint_for(&workspace),
            workspace_id: workspace,
            container_id: container.id.clone(),
            container_name: container.name.clone(),
            image: container.image.clone(),
            repo_url: None,
            status: if container.running {
                ContainerStatus::Idle
            } else {
                ContainerStatus::Stopped
            },
            resources: self.settings.resources.clone(),
            created_at: now,
            last_used_at: now,
            active_tasks: 0,
        }
    }

    /// Stop every container idle for at least `idle_timeout` as of `now`.
    pub async fn reap_idle(&self, now: DateTime<Utc>) -> Vec<WorkspaceId> {
        let timeout = chrono::Duration::from_std(self.settings.idle_timeout).unwrap_or(chrono::Duration::MAX);
        let mut reaped = Vec::new();

        for workspace in self.registry.idle_expired(now, self.settings.idle_timeout) {
            let outcome = {
                let lock = self.workspace_lock(&workspace);
                let _guard = lock.lock().await;

                // A task may have leased it between the scan and taking the lock.
                let still_idle = self
                    .registry
                    .get(&workspace)
                    .is_some_and(|r| is_reapable(&r, now, timeout));
                if still_idle {
                    Some(self.stop_locked(&workspace, true).await)
                } else {
                    None
                }
            };
            self.prune_lock(&workspace);

            match outcome {
                Some(Ok(_)) => {
                    metrics::counter!("gopilot_containers_reaped_total").increment(1);
                    reaped.push(workspace);
                }
                Some(Err(e)) => warn!(workspace_id = %workspace, error = %e, "Failed to reap idle container"),
                None => {}
            }
        }

        if !reaped.is_empty() {
            info!(count = reaped.len(), "Reaped idle workspace containers");
        }
        reaped
    }

    /// Run `reap_idle` every `interval` until `shutdown` is cancelled.
    pub fn spawn_reaper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Idle reaper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.reap_idle(Utc::now()).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_runtime::InMemoryContainerRuntime;

    fn settings() -> LifecycleSettings {
        LifecycleSettings::from_config(&OrchestratorConfig::default())
    }

    fn manager(runtime: Arc<InMemoryContainerRuntime>) -> ContainerLifecycleManager {
        ContainerLifecycleManager::new(runtime, settings(), EventBus::new(64))
    }

    fn ws(id: &str) -> WorkspaceId {
        WorkspaceId::parse(id).unwrap()
    }

    #[test]
    fn test_container_spec_contents() {
        let mut settings = settings();
        settings.llm_api_key = Some("sk-test".into());
        let spec = settings.container_spec(&ws("demo"), Some("https://github.com/a/b"));

        assert_eq!(spec.name, "gopilot-demo");
        assert_eq!(spec.image, "gcr.io/ai-agent-project/agent:latest");
        assert_eq!(spec.env["WORKSPACE_ID"], "demo");
        assert_eq!(spec.env["REPO_URL"], "https://github.com/a/b");
        assert_eq!(spec.env["LLM_API_KEY"], "sk-test");
        assert_eq!(spec.env["GOPILOT_WORKER_PORT"], "8081");
        assert_eq!(spec.labels[MANAGED_LABEL], "true");
        assert_eq!(spec.labels[REGION_LABEL], "us-central1");
        assert_eq!(spec.binds, vec!["gopilot-ws-demo:/workspace".to_string()]);
        assert_eq!(settings.endpoint_for(&ws("demo")), "http://gopilot-demo:8081");
    }

    #[tokio::test]
    async fn test_acquire_creates_then_reuses() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let manager = manager(runtime.clone());
        let workspace = ws("demo");

        let first = manager.acquire(&workspace, None).await.unwrap();
        assert_eq!(runtime.create_count(), 1);
        assert_eq!(manager.registry().get(&workspace).unwrap().status, ContainerStatus::Running);
        let container_id = first.container_id().to_string();
        drop(first);

        let record = manager.registry().get(&workspace).unwrap();
        assert_eq!(record.status, ContainerStatus::Idle);
        assert_eq!(record.active_tasks, 0);

        let second = manager.acquire(&workspace, None).await.unwrap();
        assert_eq!(second.container_id(), container_id);
        assert_eq!(runtime.create_count(), 1);
        assert_eq!(runtime.start_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_leases_count_tasks() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let manager = manager(runtime.clone());
        let workspace = ws("shared");

        let (a, b) = tokio::join!(manager.acquire(&workspace, None), manager.acquire(&workspace, None));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.container_id(), b.container_id());
        assert_eq!(runtime.create_count(), 1);
        assert_eq!(manager.registry().get(&workspace).unwrap().active_tasks, 2);

        drop(a);
        assert_eq!(manager.registry().get(&workspace).unwrap().status, ContainerStatus::Running);
        drop(b);
        assert_eq!(manager.registry().get(&workspace).unwrap().status, ContainerStatus::Idle);
    }

    #[tokio::test]
    async fn test_adopts_and_restarts_existing_containers() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        runtime.seed(RuntimeContainer {
            id: "c-running".into(),
            name: "gopilot-up".into(),
            image: "agent:1".into(),
            running: true,
            labels: HashMap::new(),
        });
        runtime.seed(RuntimeContainer {
            id: "c-stopped".into(),
            name: "gopilot-down".into(),
            image: "agent:1".into(),
            running: false,
            labels: HashMap::new(),
        });
        let manager = manager(runtime.clone());

        let up = manager.acquire(&ws("up"), None).await.unwrap();
        assert_eq!(up.container_id(), "c-running");
        assert_eq!(runtime.start_count(), 0);

        let down = manager.acquire(&ws("down"), None).await.unwrap();
        assert_eq!(down.container_id(), "c-stopped");
        assert_eq!(runtime.start_count(), 1);
        assert!(runtime.is_running("gopilot-down"));
        assert_eq!(runtime.create_count(), 0);
    }

    #[tokio::test]
    async fn test_start_failure_leaves_no_record() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        runtime.set_fail_starts(true);
        let manager = manager(runtime.clone());
        let mut events = manager.event_bus.subscribe();

        let err = manager.acquire(&ws("broken"), None).await.err().unwrap();
        assert!(matches!(err, ContainerError::StartFailed(_)));
        assert!(manager.registry().get(&ws("broken")).is_none());

        match events.recv().await.unwrap() {
            crate::infrastructure::event_bus::DomainEvent::Container(ContainerEvent::ContainerStartFailed { workspace_id, .. }) => {
                assert_eq!(workspace_id.as_str(), "broken")
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_and_unknown_workspace() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let manager = manager(runtime.clone());
        let workspace = ws("demo");

        drop(manager.acquire(&workspace, None).await.unwrap());
        let stopped = manager.stop(&workspace).await.unwrap();
        assert_eq!(stopped.status, ContainerStatus::Stopped);
        assert!(!runtime.is_running("gopilot-demo"));

        assert!(matches!(manager.stop(&ws("ghost")).await, Err(ContainerError::NotFound(_))));

        // A stopped workspace is started again on the next acquire.
        let lease = manager.acquire(&workspace, None).await.unwrap();
        assert_eq!(lease.container_id(), stopped.container_id);
        assert!(runtime.is_running("gopilot-demo"));
    }

    #[tokio::test]
    async fn test_reap_idle_respects_timeout_and_leases() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let manager = manager(runtime.clone());
        let idle = ws("idle");
        let busy = ws("busy");

        drop(manager.acquire(&idle, None).await.unwrap());
        let _lease = manager.acquire(&busy, None).await.unwrap();

        // Not yet expired.
        assert!(manager.reap_idle(Utc::now()).await.is_empty());

        let later = Utc::now() + chrono::Duration::minutes(16);
        let reaped = manager.reap_idle(later).await;
        assert_eq!(reaped, vec![idle.clone()]);
        assert_eq!(manager.registry().get(&idle).unwrap().status, ContainerStatus::Stopped);
        assert_eq!(manager.registry().get(&busy).unwrap().status, ContainerStatus::Running);
        assert!(runtime.is_running("gopilot-busy"));
    }

    #[tokio::test]
    async fn test_list_merges_runtime_only_containers() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        runtime.seed(RuntimeContainer {
            id: "orphan".into(),
            name: "gopilot-orphan".into(),
            image: "agent:1".into(),
            running: true,
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (WORKSPACE_LABEL.to_string(), "orphan".to_string()),
            ]),
        });
        let manager = manager(runtime.clone());
        let _lease = manager.acquire(&ws("alpha"), None).await.unwrap();

        let records = manager.list().await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.workspace_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "orphan"]);
        assert_eq!(records[0].status, ContainerStatus::Running);
        assert_eq!(records[1].status, ContainerStatus::Idle);
    }

    #[tokio::test]
    async fn test_lease_from_before_stop_does_not_idle_new_lease() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let manager = manager(runtime.clone());
        let workspace = ws("demo");

        let old = manager.acquire(&workspace, None).await.unwrap();
        manager.stop(&workspace).await.unwrap();
        let new = manager.acquire(&workspace, None).await.unwrap();
        assert_eq!(manager.registry().get(&workspace).unwrap().active_tasks, 2);

        drop(old);
        let record = manager.registry().get(&workspace).unwrap();
        assert_eq!(record.status, ContainerStatus::Running);
        assert_eq!(record.active_tasks, 1);

        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(manager.reap_idle(later).await.is_empty());
        assert!(runtime.is_running("gopilot-demo"));

        drop(new);
        assert_eq!(manager.registry().get(&workspace).unwrap().status, ContainerStatus::Idle);
        assert_eq!(manager.reap_idle(later).await, vec![workspace]);
    }

    #[tokio::test]
    async fn test_workspace_locks_pruned_after_stop_and_reap() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let manager = manager(runtime.clone());

        drop(manager.acquire(&ws("one"), None).await.unwrap());
        drop(manager.acquire(&ws("two"), None).await.unwrap());
        assert_eq!(manager.lock_count(), 2);

        manager.stop(&ws("one")).await.unwrap();
        assert_eq!(manager.lock_count(), 1);

        manager.reap_idle(Utc::now() + chrono::Duration::hours(1)).await;
        assert_eq!(manager.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancel() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let manager = Arc::new(manager(runtime));
        let shutdown = CancellationToken::new();
        let handle = manager.clone().spawn_reaper(Duration::from_millis(10), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
