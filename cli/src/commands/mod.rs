// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

//! Client subcommands. Each talks to a running orchestrator over HTTP.

pub mod containers;
pub mod health;
pub mod orchestrate;

pub use self::containers::ContainersCommand;
pub use self::orchestrate::OrchestrateArgs;
