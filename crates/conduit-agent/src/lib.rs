// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent Lifecycle and the gateway-facing agent service (spec §4.7).
//! Drives an [`AgentRuntime`] collaborator over a per-session FIFO queue,
//! publishing run lifecycle and streaming events through a [`LifecycleSink`].

pub mod lifecycle;
pub mod runtime;
pub mod service;

pub use lifecycle::{
    AbortSignal, Lifecycle, LifecycleSink, RunDeltaEvent, RunDeltaKind, RunEndEvent, RunErrorEvent, RunStartEvent,
};
pub use runtime::{AgentRuntime, MockAgentRuntime, ModelAgentRuntime, RunCallbacks, RunOutcome, RunRequest};
pub use service::{AgentService, AgentServiceConfig};
