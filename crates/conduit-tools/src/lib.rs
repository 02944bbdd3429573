// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The `Tool` trait, call/output types, and a registry that dispatches a
//! model's tool calls to registered implementations.

pub mod builtin;
mod registry;
mod tool;

pub use builtin::{ExecTool, ReadFileTool};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{Tool, ToolCall, ToolOutput, ToolOutputPart};
