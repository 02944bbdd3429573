// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Base every service is built on: register with the gateway, issue
//! requests and await their responses, emit events, and dispatch inbound
//! requests/events to handler callbacks.
//!
//! Generalizes the command-channel-plus-completion-future pattern the
//! teacher's `control::service::AgentHandle` uses for one agent into a
//! reusable base any conduit service (sessions, agent, channels, cron) can
//! build on top of.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

use conduit_protocol::{decode_json, encode_json, ErrorCode, Frame, FrameError, ProtocolError, RequestIdGenerator, ServiceRegistration};

use crate::reconnector::Reconnector;

const RECONNECT_BASE: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);
/// Finite so a transport that genuinely can't reconnect (the in-process
/// transport, any permanently-gone WebSocket peer) gives up instead of
/// backing off forever.
const RECONNECT_MAX_ATTEMPTS: u32 = 8;

/// Abstraction over "a connection to the gateway" — satisfied by the
/// in-process transport used in tests and by the WebSocket transport
/// (`crate::ws`) used in a real deployment.
#[async_trait]
pub trait GatewayConn: Send + Sync + 'static {
    async fn send(&self, frame: Frame) -> Result<(), ProtocolError>;
    /// Receive the next inbound frame, or `None` if the connection closed.
    async fn recv(&self) -> Option<Frame>;

    /// Re-establish the transport in place after `recv` returned `None`.
    /// The default rejects reconnection outright; transports that can
    /// redial (the WebSocket client) override this.
    async fn reconnect(&self) -> Result<(), String> {
        Err("this transport does not support reconnection".to_string())
    }
}

/// In-process [`GatewayConn`] backed directly by a [`crate::GatewayHandle`].
///
/// Every unit/integration test in this workspace that exercises the gateway
/// end-to-end uses this transport rather than a real socket.
pub struct InProcessConn {
    id: crate::ConnectionId,
    handle: crate::GatewayHandle,
    inbox: Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl InProcessConn {
    pub async fn connect(handle: crate::GatewayHandle) -> Arc<Self> {
        let (id, inbox) = handle.connect().await;
        Arc::new(Self {
            id,
            handle,
            inbox: Mutex::new(inbox),
        })
    }
}

#[async_trait]
impl GatewayConn for InProcessConn {
    async fn send(&self, frame: Frame) -> Result<(), ProtocolError> {
        self.handle.send_frame(self.id, frame);
        Ok(())
    }

    async fn recv(&self) -> Option<Frame> {
        self.inbox.lock().await.recv().await
    }
}

impl Drop for InProcessConn {
    fn drop(&mut self) {
        self.handle.disconnect(self.id);
    }
}

/// Callbacks a service supplies for frames the gateway routes to it.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Handle an inbound request addressed to one of this service's claimed
    /// methods. Returns the response payload, or an error to report back.
    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        let _ = (method, params);
        Err(FrameError::new(ErrorCode::NoHandler, "handler not implemented"))
    }

    /// Handle an inbound event this service subscribed to.
    async fn handle_event(&self, source: &str, event: &str, payload: Option<Value>) {
        let _ = (source, event, payload);
    }
}

struct PendingCall {
    reply: oneshot::Sender<Result<Option<Value>, FrameError>>,
}

/// A connected, registered service. Wraps a [`GatewayConn`], a pending-call
/// table for outbound requests, and a dispatch loop that routes inbound
/// frames to a [`ServiceHandler`].
pub struct ServiceClient<C: GatewayConn> {
    conn: Arc<C>,
    id_gen: RequestIdGenerator,
    pending: Arc<Mutex<HashMap<String, PendingCall>>>,
    service: String,
}

impl<C: GatewayConn> ServiceClient<C> {
    /// Register `registration` with the gateway and start the dispatch loop
    /// that forwards inbound frames to `handler`.
    pub async fn connect(conn: Arc<C>, registration: ServiceRegistration, handler: Arc<dyn ServiceHandler>) -> Result<Arc<Self>, FrameError> {
        let service = registration.service.clone();
        let client = Arc::new(Self {
            conn: conn.clone(),
            id_gen: RequestIdGenerator::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            service: service.clone(),
        });

        let reg_id = client.id_gen.next();
        conn.send(Frame::request(reg_id.clone(), "gateway", "gateway.register", Some(serde_json::to_value(&registration).unwrap())))
            .await
            .map_err(|e| FrameError::new(ErrorCode::RegisterFailed, e.to_string()))?;

        // The register response arrives through the same dispatch loop as
        // everything else, so spawn the loop first, then wait for it to
        // resolve the registration call below via the pending map.
        let (reg_tx, reg_rx) = oneshot::channel();
        client.pending.lock().await.insert(reg_id, PendingCall { reply: reg_tx });

        let dispatch_conn = conn;
        let dispatch_pending = client.pending.clone();
        let dispatch_handler = handler;
        let dispatch_client = client.clone();
        let dispatch_registration = registration;
        tokio::spawn(async move {
            Self::run_dispatch_loop(dispatch_conn, dispatch_pending, dispatch_handler, dispatch_client, dispatch_registration).await;
        });

        reg_rx
            .await
            .map_err(|_| FrameError::new(ErrorCode::RegisterFailed, "gateway closed before responding"))??;

        Ok(client)
    }

    /// Pumps inbound frames to `handler` until the transport closes, then
    /// reconnects through a [`Reconnector`] backoff and re-registers (which
    /// also replays `registration`'s subscriptions) before resuming. Any
    /// call left pending across the gap fails immediately rather than
    /// waiting out its own timeout, since the gateway connection it was
    /// addressed to no longer exists.
    async fn run_dispatch_loop(
        conn: Arc<C>,
        pending: Arc<Mutex<HashMap<String, PendingCall>>>,
        handler: Arc<dyn ServiceHandler>,
        client: Arc<Self>,
        registration: ServiceRegistration,
    ) {
        loop {
            while let Some(frame) = conn.recv().await {
                Self::dispatch(frame, &pending, handler.as_ref(), conn.as_ref()).await;
            }

            Self::fail_pending(&pending, "transport closed; reconnecting").await;

            let mut reconnector = Reconnector::new(RECONNECT_BASE, RECONNECT_MAX, RECONNECT_MAX_ATTEMPTS);
            let reconnected = loop {
                let Some(delay) = reconnector.next_delay() else {
                    warn!(service = %client.service, "giving up reconnecting to gateway");
                    break false;
                };
                tokio::time::sleep(delay).await;
                match conn.reconnect().await {
                    Ok(()) => break true,
                    Err(e) => warn!(service = %client.service, error = %e, attempt = reconnector.attempt(), "reconnect attempt failed"),
                }
            };

            if !reconnected {
                Self::fail_pending(&pending, "gateway unreachable; giving up reconnection").await;
                return;
            }

            info!(service = %client.service, "reconnected to gateway, re-registering");
            let reg_id = client.id_gen.next();
            let reg_frame = Frame::request(reg_id, "gateway", "gateway.register", Some(serde_json::to_value(&registration).unwrap()));
            if let Err(e) = conn.send(reg_frame).await {
                warn!(service = %client.service, error = %e, "failed to re-register after reconnect");
            }
        }
    }

    async fn fail_pending(pending: &Arc<Mutex<HashMap<String, PendingCall>>>, reason: &str) {
        let stale: Vec<_> = pending.lock().await.drain().collect();
        for (_, call) in stale {
            let _ = call.reply.send(Err(FrameError::new(ErrorCode::Custom("CONNECTION_LOST".into()), reason)));
        }
    }

    async fn dispatch(frame: Frame, pending: &Arc<Mutex<HashMap<String, PendingCall>>>, handler: &dyn ServiceHandler, conn: &C) {
        match frame {
            Frame::Response { id, ok, payload, error } => {
                let waiter = pending.lock().await.remove(&id);
                if let Some(waiter) = waiter {
                    let result = if ok { Ok(payload) } else { Err(error.unwrap_or_else(|| FrameError::new(ErrorCode::Custom("UNKNOWN".into()), "no error detail"))) };
                    let _ = waiter.reply.send(result);
                }
            }
            Frame::Request { id, method, params, .. } => {
                // The gateway already carries the caller's identity; this
                // service only has to answer with the same id it was given.
                let response = match handler.handle_request(&method, params).await {
                    Ok(payload) => Frame::response_ok(id, payload),
                    Err(error) => Frame::response_err(id, error),
                };
                let _ = conn.send(response).await;
            }
            Frame::Event { source, event, payload, .. } => {
                handler.handle_event(&source, &event, payload).await;
            }
        }
    }

    /// Call a method on another service, waiting up to `timeout` for a reply.
    pub async fn call(&self, target: &str, method: &str, params: Option<Value>, timeout: Duration) -> Result<Option<Value>, FrameError> {
        let id = self.id_gen.next();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), PendingCall { reply: tx });

        if let Err(e) = self.conn.send(Frame::request(id.clone(), target, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(FrameError::new(ErrorCode::ServiceUnavailable, e.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(FrameError::new(ErrorCode::ServiceUnavailable, "connection closed before reply")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(FrameError::new(ErrorCode::Timeout, "call timed out"))
            }
        }
    }

    /// Emit an event; `source` defaults to this service's own name on the
    /// gateway side if left empty.
    pub async fn emit(&self, event: &str, payload: Option<Value>) -> Result<(), ProtocolError> {
        self.conn.send(Frame::event(self.service.clone(), event, payload)).await
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }
}

/// Parse a raw wire message into a [`Frame`], logging and discarding
/// anything unparseable (mirrors the teacher's tolerant handling of
/// malformed control-channel messages).
pub fn parse_inbound(raw: &str) -> Option<Frame> {
    match decode_json(raw) {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(error = %e, "dropping malformed inbound frame");
            None
        }
    }
}

pub fn serialize_outbound(frame: &Frame) -> Result<String, ProtocolError> {
    encode_json(frame)
}
