// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! WebSocket transport binding for the gateway: a listener that accepts
//! connections, registers each with the [`crate::Gateway`] actor, and pumps
//! frames in both directions. Spec §6 fixes the default bind address at
//! `ws://127.0.0.1:9000`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use conduit_protocol::{decode_json, encode_json};

use crate::client::{parse_inbound, serialize_outbound};
use crate::GatewayHandle;

/// Default bind address for the gateway's WebSocket transport (spec §6).
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9000";

/// Accept connections on `addr` until the returned task is aborted/dropped.
pub async fn serve(addr: SocketAddr, gateway: GatewayHandle) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "gateway websocket transport listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, gateway).await {
                warn!(%peer, error = %e, "websocket connection ended with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, gateway: GatewayHandle) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let (conn_id, mut outbox) = gateway.connect().await;
    debug!(%peer, %conn_id, "websocket connection established");

    let pump = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            match serialize_outbound(&frame) {
                Ok(text) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode outbound frame"),
            }
        }
    });

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(frame) = parse_inbound(&text) {
                    gateway.send_frame(conn_id, frame);
                }
            }
            Ok(Message::Binary(bytes)) => {
                // Tolerate CBOR-framed clients too, though the canonical
                // transport is JSON text (spec §6).
                if let Ok(frame) = conduit_protocol::decode_cbor(&bytes) {
                    gateway.send_frame(conn_id, frame);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%peer, error = %e, "websocket read error");
                break;
            }
        }
    }

    gateway.disconnect(conn_id);
    pump.abort();
    Ok(())
}

/// Dial a gateway over WebSocket and wrap the stream as a [`crate::GatewayConn`].
pub struct WsConn {
    url: String,
    write: tokio::sync::Mutex<futures::stream::SplitSink<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>, Message>>,
    read: tokio::sync::Mutex<futures::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>>>,
}

impl WsConn {
    pub async fn dial(url: &str) -> anyhow::Result<Arc<Self>> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws.split();
        Ok(Arc::new(Self {
            url: url.to_string(),
            write: tokio::sync::Mutex::new(write),
            read: tokio::sync::Mutex::new(read),
        }))
    }
}

#[async_trait::async_trait]
impl crate::client::GatewayConn for WsConn {
    async fn send(&self, frame: conduit_protocol::Frame) -> Result<(), conduit_protocol::ProtocolError> {
        let text = encode_json(&frame)?;
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Text(text)).await;
        Ok(())
    }

    async fn recv(&self) -> Option<conduit_protocol::Frame> {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await? {
                Ok(Message::Text(text)) => {
                    if let Ok(frame) = decode_json(&text) {
                        return Some(frame);
                    }
                }
                Ok(Message::Close(_)) => return None,
                Err(_) => return None,
                _ => continue,
            }
        }
    }

    async fn reconnect(&self) -> Result<(), String> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.url).await.map_err(|e| e.to_string())?;
        let (write, read) = ws.split();
        *self.write.lock().await = write;
        *self.read.lock().await = read;
        Ok(())
    }
}
