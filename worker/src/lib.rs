// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! gopilot workspace worker
//!
//! Runs inside each workspace container. Prepares the checkout under
//! `/workspace` and serves the workspace tools over MCP JSON-RPC.

pub mod config;
pub mod error;
pub mod path_sanitizer;
pub mod server;
pub mod tools;
pub mod workspace;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use server::{router, WorkerState};
pub use workspace::Workspace;
