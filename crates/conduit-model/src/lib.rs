// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Model provider abstraction: message/content types, a static model
//! catalog, and the [`ModelProvider`] trait a real LLM integration would
//! implement. No per-provider wire protocol lives here (Non-goal) — only
//! [`MockProvider`]/[`ScriptedMockProvider`], which stand in for one in tests.

pub mod catalog;
mod mock;
mod provider;
mod types;

pub use catalog::{InputModality, ModelCatalogEntry};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::ModelProvider;
pub use types::*;
