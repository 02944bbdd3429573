// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The gateway actor: owns the [`Registry`], [`Router`], event sequence
//! counter, and pending-request table behind one command loop.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use conduit_protocol::{ErrorCode, Frame, FrameError, RequestIdGenerator, ServiceRegistration};

use crate::connection::ConnectionId;
use crate::registry::Registry;
use crate::router::Router;

/// Default time a forwarded request waits for a response before the caller
/// receives `TIMEOUT` (spec §4.2).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Pending {
    caller: ConnectionId,
    original_id: String,
}

enum Command {
    Connect {
        reply: oneshot::Sender<(ConnectionId, mpsc::UnboundedReceiver<Frame>)>,
    },
    Inbound {
        conn: ConnectionId,
        frame: Frame,
    },
    Disconnect {
        conn: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<GatewayStats>,
    },
    CheckTimeout {
        request_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub services: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    pub connections: usize,
}

/// Cheap-to-clone handle used by connections to talk to the gateway actor.
#[derive(Clone)]
pub struct GatewayHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl GatewayHandle {
    /// Register a new connection and obtain its outbound frame stream.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Connect { reply: reply_tx });
        reply_rx.await.expect("gateway actor has shut down")
    }

    /// Deliver one inbound frame from `conn` to the gateway.
    pub fn send_frame(&self, conn: ConnectionId, frame: Frame) {
        let _ = self.cmd_tx.send(Command::Inbound { conn, frame });
    }

    pub fn disconnect(&self, conn: ConnectionId) {
        let _ = self.cmd_tx.send(Command::Disconnect { conn });
    }

    pub async fn stats(&self) -> GatewayStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Stats { reply: reply_tx });
        reply_rx.await.unwrap_or(GatewayStats {
            services: vec![],
            methods: vec![],
            events: vec![],
            connections: 0,
        })
    }
}

/// The gateway itself. Call [`Gateway::spawn`] to start the actor task.
pub struct Gateway {
    registry: Registry,
    router: Router,
    outboxes: HashMap<ConnectionId, mpsc::UnboundedSender<Frame>>,
    pending: HashMap<String, Pending>,
    seq: u64,
    next_conn: u64,
    request_timeout: Duration,
    id_gen: RequestIdGenerator,
}

impl Gateway {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            registry: Registry::new(),
            router: Router::new(),
            outboxes: HashMap::new(),
            pending: HashMap::new(),
            seq: 0,
            next_conn: 0,
            request_timeout,
            id_gen: RequestIdGenerator::new(),
        }
    }

    /// Spawn the actor loop on the current tokio runtime, returning a handle.
    pub fn spawn(request_timeout: Duration) -> GatewayHandle {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let handle = GatewayHandle {
            cmd_tx: cmd_tx.clone(),
        };
        let mut gw = Gateway::new(request_timeout);
        tokio::spawn(async move {
            info!("gateway actor started");
            while let Some(cmd) = cmd_rx.recv().await {
                gw.handle_command(cmd, &cmd_tx);
            }
            info!("gateway actor stopped");
        });
        handle
    }

    fn handle_command(&mut self, cmd: Command, self_tx: &mpsc::UnboundedSender<Command>) {
        match cmd {
            Command::Connect { reply } => {
                let conn = ConnectionId(self.next_conn);
                self.next_conn += 1;
                let (tx, rx) = mpsc::unbounded_channel();
                self.outboxes.insert(conn, tx);
                let _ = reply.send((conn, rx));
            }
            Command::Inbound { conn, frame } => self.handle_inbound(conn, frame, self_tx),
            Command::Disconnect { conn } => self.handle_disconnect(conn),
            Command::Stats { reply } => {
                let _ = reply.send(self.stats_snapshot());
            }
            Command::CheckTimeout { request_id } => self.handle_timeout(&request_id),
        }
    }

    fn stats_snapshot(&self) -> GatewayStats {
        GatewayStats {
            services: self.registry.services(),
            methods: self
                .router
                .method_owners_snapshot()
                .into_iter()
                .map(|(m, _)| m)
                .collect(),
            events: self.router.event_names_snapshot(),
            connections: self.outboxes.len(),
        }
    }

    fn send_to(&self, conn: ConnectionId, frame: Frame) {
        if let Some(tx) = self.outboxes.get(&conn) {
            let _ = tx.send(frame);
        }
    }

    fn handle_inbound(&mut self, conn: ConnectionId, frame: Frame, self_tx: &mpsc::UnboundedSender<Command>) {
        match frame {
            Frame::Request { id, method, params, .. } if method == "gateway.register" => {
                self.handle_register(conn, id, params);
            }
            Frame::Request { id, method, .. } if method == "gateway.stats" => {
                let payload = serde_json::to_value(self.stats_snapshot()).ok();
                self.send_to(conn, Frame::response_ok(id, payload));
            }
            Frame::Request { id, target, method, params } => {
                self.forward_request(conn, id, target, method, params, self_tx);
            }
            Frame::Response { id, ok, payload, error } => {
                self.forward_response(id, ok, payload, error);
            }
            Frame::Event { source, event, payload, .. } => {
                self.fan_out_event(conn, source, event, payload);
            }
        }
    }

    fn handle_register(&mut self, conn: ConnectionId, id: String, params: Option<serde_json::Value>) {
        let params = match params {
            Some(v) => v,
            None => {
                self.send_to(
                    conn,
                    Frame::response_err(id, FrameError::new(ErrorCode::RegisterFailed, "missing params")),
                );
                return;
            }
        };
        let reg: ServiceRegistration = match serde_json::from_value(params) {
            Ok(r) => r,
            Err(e) => {
                self.send_to(
                    conn,
                    Frame::response_err(id, FrameError::new(ErrorCode::RegisterFailed, e.to_string())),
                );
                return;
            }
        };

        debug!(service = %reg.service, conn = %conn, "registering service");

        // Last-writer-wins: tear down the prior owner's router entries first.
        if let Some(prior_conn) = self.registry.insert(conn, reg.clone()) {
            self.router.disconnect(prior_conn);
        }
        self.router.claim_methods(conn, &reg.methods);
        self.router.subscribe(conn, &reg.subscriptions);

        let payload = serde_json::to_value(self.stats_snapshot()).ok();
        self.send_to(conn, Frame::response_ok(id, payload));
    }

    fn forward_request(
        &mut self,
        caller: ConnectionId,
        id: String,
        target: String,
        method: String,
        params: Option<serde_json::Value>,
        self_tx: &mpsc::UnboundedSender<Command>,
    ) {
        let Some(owner) = self.router.owner_of(&method) else {
            self.send_to(
                caller,
                Frame::response_err(
                    id,
                    FrameError::new(ErrorCode::NoHandler, format!("no handler for method '{method}'")),
                ),
            );
            return;
        };
        if !self.registry.is_live(owner) {
            self.send_to(
                caller,
                Frame::response_err(
                    id,
                    FrameError::new(ErrorCode::ServiceUnavailable, format!("service owning '{method}' is not live")),
                ),
            );
            return;
        }

        // Mint an internal id so the gateway can correlate the forwarded
        // request with its response even if two callers happen to reuse the
        // same caller-chosen id.
        let internal_id = self.id_gen.next();
        self.pending.insert(
            internal_id.clone(),
            Pending {
                caller,
                original_id: id,
            },
        );

        self.send_to(
            owner,
            Frame::Request {
                id: internal_id.clone(),
                target,
                method,
                params,
            },
        );

        let tx = self_tx.clone();
        let timeout = self.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Command::CheckTimeout { request_id: internal_id });
        });
    }

    fn forward_response(&mut self, internal_id: String, ok: bool, payload: Option<serde_json::Value>, error: Option<FrameError>) {
        let Some(pending) = self.pending.remove(&internal_id) else {
            // Already timed out, or caller gone, or a stray response — silently drop.
            return;
        };
        self.send_to(
            pending.caller,
            Frame::Response {
                id: pending.original_id,
                ok,
                payload,
                error,
            },
        );
    }

    fn handle_timeout(&mut self, internal_id: &str) {
        let Some(pending) = self.pending.remove(internal_id) else {
            return; // already responded
        };
        warn!(request_id = %internal_id, "request timed out");
        self.send_to(
            pending.caller,
            Frame::response_err(pending.original_id, FrameError::new(ErrorCode::Timeout, "request timed out")),
        );
    }

    fn fan_out_event(&mut self, conn: ConnectionId, source: String, event: String, payload: Option<serde_json::Value>) {
        self.seq += 1;
        let seq = self.seq;
        let resolved_source = self.registry.resolve_source(conn, &source);
        let subscribers = self.router.subscribers_of(&event);
        for sub in subscribers {
            self.send_to(
                sub,
                Frame::Event {
                    source: resolved_source.clone(),
                    event: event.clone(),
                    payload: payload.clone(),
                    seq,
                },
            );
        }
    }

    fn handle_disconnect(&mut self, conn: ConnectionId) {
        self.outboxes.remove(&conn);
        let prior = self.registry.remove(conn);
        self.router.disconnect(conn);

        // Reject pending requests where this connection was the caller —
        // they cannot be answered, so drop them silently (no response sent).
        self.pending.retain(|_, p| p.caller != conn);

        if let Some(reg) = prior {
            self.seq += 1;
            let seq = self.seq;
            let payload = Some(serde_json::json!({ "service": reg.service }));
            let subscribers = self.router.subscribers_of("service.disconnected");
            for sub in subscribers {
                self.send_to(
                    sub,
                    Frame::Event {
                        source: "gateway".to_string(),
                        event: "service.disconnected".to_string(),
                        payload: payload.clone(),
                        seq,
                    },
                );
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
