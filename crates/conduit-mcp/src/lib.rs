// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `conduit-mcp` — bridges the gateway's tool surface onto the Model Context
//! Protocol.
//!
//! Two independent pieces share the same [`conduit_tools::ToolRegistry`]:
//!
//! - [`service::ToolsService`] registers with the gateway as the `tools`
//!   service and answers `tool.list` / `tool.execute` / `tool.describe` for
//!   any other gateway-connected service (the agent runtime, in particular).
//! - [`server::ConduitMcpServer`] speaks MCP directly to an external client
//!   (Cursor, Claude Desktop, ...) over stdio, executing against the same
//!   registry in-process rather than round-tripping through the gateway.
//!
//! ```text
//! MCP client ──stdio──► ConduitMcpServer ──┐
//!                                          ▼
//!                                    ToolRegistry ◄── ToolsService ◄── gateway ◄── other services
//! ```

pub mod bridge;
pub mod server;
pub mod service;

pub use server::ConduitMcpServer;
pub use service::ToolsService;

use std::sync::Arc;

use anyhow::Result;
use conduit_tools::ToolRegistry;
use rmcp::ServiceExt;

/// Start an MCP stdio server over `registry`, blocking until the client
/// disconnects (stdin EOF) or the process is terminated.
pub async fn serve_stdio(registry: Arc<ToolRegistry>) -> Result<()> {
    let server = ConduitMcpServer::new(registry);
    let running = server.serve((tokio::io::stdin(), tokio::io::stdout())).await.map_err(|e| anyhow::anyhow!("MCP server init error: {e}"))?;
    running.waiting().await.map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;
    Ok(())
}
