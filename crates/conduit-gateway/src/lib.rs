// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The Gateway: a single in-process router and fan-out hub for [`Frame`]s
//! between loosely coupled services.
//!
//! # Design
//!
//! ```text
//!   Service A ─┐                           ┌─► Service A
//!   Service B ─┼── GatewayHandle::send ───► Gateway actor ─── outbox ──┼─► Service B
//!   Service C ─┘      (mpsc command)         (single task)             └─► Service C
//! ```
//!
//! All registry/router mutation happens inside one actor task (a single
//! `tokio::select!` loop owning all the maps), so reads and writes never
//! race — the alternative (a `Mutex`-guarded map touched from every
//! connection's task) would work too, but the actor keeps the ordering of
//! register/disconnect/forward operations trivially serialized, which the
//! uniqueness and fan-out invariants depend on.
//!
//! [`Frame`]: conduit_protocol::Frame

mod client;
mod connection;
mod gateway;
mod reconnector;
mod registry;
mod router;
pub mod ws;

pub use client::{GatewayConn, InProcessConn, ServiceClient, ServiceHandler};
pub use connection::ConnectionId;
pub use gateway::{Gateway, GatewayHandle, GatewayStats};
pub use reconnector::Reconnector;
pub use registry::Registry;
pub use router::Router;
