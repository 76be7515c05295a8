// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! gopilot CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Service composition root and HTTP client commands

pub mod client;
pub mod commands;
pub mod server;
