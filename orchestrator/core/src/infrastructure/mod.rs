// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod llm;
pub mod memory_runtime;
pub mod runtime;
pub mod tool_client;
