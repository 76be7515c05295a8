// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`gopilot-orchestrator-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. Real work is delegated to `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP/SSE (Axum) | Orchestration, container management, tool invocation, events |
//! | [`proxy`] | HTTP/SSE (Axum) | OpenAI-compatible `/v1` endpoints for IDE clients |

pub mod api;
pub mod proxy;
