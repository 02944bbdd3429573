// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `ChannelAdapter`: the platform-specific surface a concrete channel
//! implements. Everything else (dedupe, debounce, chunking, retry) is
//! shared pipeline code the adapter is built on top of.

use async_trait::async_trait;

/// Platform connect/send/typing calls. A concrete adapter (Telegram,
/// WhatsApp, the in-memory `LoopbackChannel`) implements this and wires it
/// to an [`crate::pipeline::IngressPipeline`] plus [`crate::typing::TypingIndicator`].
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable channel identifier used in session keys (`<channel>:<userId>`).
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), String>;

    async fn send(&self, user_id: &str, text: &str) -> Result<(), String>;

    async fn send_typing(&self, user_id: &str) -> Result<(), String>;

    async fn disconnect(&self) -> Result<(), String> {
        Ok(())
    }
}
