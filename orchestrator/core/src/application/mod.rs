// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod container_lifecycle;
pub mod orchestrator;
pub mod task_dispatcher;

pub use container_lifecycle::{ContainerLease, ContainerLifecycleManager, LifecycleSettings};
pub use orchestrator::{OrchestrationError, Orchestrator, OrchestratorSettings};
pub use task_dispatcher::TaskDispatcher;
