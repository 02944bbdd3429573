// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Channel ingress pipeline and reply delivery (spec §4.8–4.9): a
//! `ChannelAdapter` supplies platform-specific connect/send/typing calls,
//! everything else (allowlist, dedupe, debounce, chunking, retry) is shared.

pub mod adapter;
pub mod delivery;
pub mod loopback;
pub mod pipeline;
pub mod service;
pub mod typing;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use adapter::ChannelAdapter;
pub use delivery::{chunk_text, deliver_reply, ChunkSender, DeliveryOptions};
pub use loopback::LoopbackChannel;
pub use pipeline::{IngressPipeline, InboundMessage, PipelineConfig, RoutingSink};
pub use service::ChannelService;
pub use typing::{TypingIndicator, TypingSink};
