// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Session key algebra, a persistence contract plus file-backed
//! implementation, and the per-session FIFO that guarantees at-most-one
//! concurrent run per conversation.

pub mod key;
pub mod queue;
pub mod service;
pub mod store;

pub use queue::{ExecuteHook, QueuedMessage, RunError, RunResult, SessionMessageQueue};
pub use service::SessionsService;
pub use store::{
    CreateOutcome, FileSessionStore, ListFilter, MessageFilter, MessageRole, Session, SessionKind, SessionMessage,
    SessionPatch, SessionStore, StoreError,
};
