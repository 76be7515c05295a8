// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! gopilot orchestrator core
//!
//! Routes natural-language tasks to per-workspace agent containers, exposes
//! container tools to a language model, and aggregates the results.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain, application services, adapters and HTTP surface

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
