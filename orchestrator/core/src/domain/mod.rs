// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects, events and seams shared by every layer of the orchestrator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Workspace, container, task, tool and model vocabulary

pub mod config;
pub mod container;
pub mod events;
pub mod llm;
pub mod mcp;
pub mod task;
pub mod workspace;
