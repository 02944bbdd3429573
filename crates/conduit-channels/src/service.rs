// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Gateway-registered channel service: wires a [`ChannelAdapter`] to the
//! ingress pipeline on the inbound side, and to [`deliver_reply`] on the
//! outbound side by subscribing to `run.delta` assistant-complete events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use conduit_gateway::{GatewayConn, ServiceClient, ServiceHandler};
use conduit_protocol::{ErrorCode, FrameError, ServiceRegistration};
use conduit_session::key;

use crate::adapter::ChannelAdapter;
use crate::delivery::{deliver_reply, ChunkSender, DeliveryOptions};
use crate::pipeline::{IngressPipeline, InboundMessage, PipelineConfig, RoutingSink};

const GATEWAY_CALL_TIMEOUT: Duration = Duration::from_secs(10);

struct AdapterChunkSender<A: ChannelAdapter> {
    adapter: Arc<A>,
    user_id: String,
}

#[async_trait]
impl<A: ChannelAdapter> ChunkSender for AdapterChunkSender<A> {
    async fn send_chunk(&self, text: &str) -> Result<(), String> {
        self.adapter.send(&self.user_id, text).await
    }
}

/// Forwards a debounced ingress batch to the gateway as `message.received`.
struct GatewaySink<C: GatewayConn> {
    client: Arc<ServiceClient<C>>,
}

#[async_trait]
impl<C: GatewayConn> RoutingSink for GatewaySink<C> {
    async fn on_inbound_message(&self, channel: &str, user_id: &str, text: String, metadata: Option<Value>) {
        let payload = serde_json::json!({
            "channel": channel,
            "userId": user_id,
            "content": text,
            "metadata": metadata,
        });
        let _ = self.client.emit("message.received", Some(payload)).await;
    }
}

#[derive(Debug, Deserialize)]
struct RunDeltaPayload {
    #[serde(rename = "sessionKey")]
    session_key: String,
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "isComplete")]
    is_complete: bool,
}

/// Gateway-registered service pairing one [`ChannelAdapter`] with the
/// shared ingress pipeline and reply delivery.
pub struct ChannelService<C: GatewayConn, A: ChannelAdapter + 'static> {
    client: Arc<ServiceClient<C>>,
    adapter: Arc<A>,
    pipeline: Arc<IngressPipeline>,
    delivery_opts: DeliveryOptions,
}

impl<C: GatewayConn, A: ChannelAdapter + 'static> ChannelService<C, A> {
    pub async fn connect(
        conn: Arc<C>,
        adapter: Arc<A>,
        pipeline_config: PipelineConfig,
        delivery_opts: DeliveryOptions,
    ) -> Result<Arc<Self>, FrameError> {
        let service_name = format!("channel-{}", adapter.name());
        let registration = ServiceRegistration::new(service_name)
            .with_methods(["channel.send", "channel.status", "channel.list"])
            .with_subscriptions(["run.delta"]);

        let dispatcher = Arc::new(Dispatcher {
            inner: tokio::sync::OnceCell::new(),
        });
        let client = ServiceClient::connect(conn, registration, dispatcher.clone()).await?;

        let sink = Arc::new(GatewaySink { client: client.clone() });
        let pipeline = IngressPipeline::new(adapter.name(), pipeline_config, sink);

        let service = Arc::new(Self {
            client,
            adapter,
            pipeline,
            delivery_opts,
        });
        let _ = dispatcher.inner.set(service.clone());

        Ok(service)
    }

    /// Entry point for a platform adapter's polling/webhook loop.
    pub async fn accept_inbound(&self, msg: InboundMessage) {
        self.pipeline.accept(msg).await;
    }

    async fn handle_event_inner(&self, _source: &str, event: &str, payload: Option<Value>) {
        if event != "run.delta" {
            return;
        }
        let Some(payload) = payload else { return };
        let Ok(delta) = serde_json::from_value::<RunDeltaPayload>(payload) else {
            return;
        };
        if delta.kind != "assistant" || !delta.is_complete {
            return;
        }
        let Some(text) = delta.text else { return };

        let parsed = key::parse(&delta.session_key);
        if parsed.kind != self.adapter.name() {
            return; // not this channel's session
        }

        let sender = AdapterChunkSender {
            adapter: self.adapter.clone(),
            user_id: parsed.id,
        };
        if let Err(e) = deliver_reply(&sender, &text, &self.delivery_opts).await {
            warn!(session = %delta.session_key, error = %e, "reply delivery failed");
        }
    }

    async fn handle_request_inner(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match method {
            "channel.send" => {
                #[derive(Deserialize)]
                struct SendParams {
                    #[serde(rename = "userId")]
                    user_id: String,
                    text: String,
                }
                let params: SendParams = params
                    .and_then(|v| serde_json::from_value(v).ok())
                    .ok_or_else(|| FrameError::new(ErrorCode::Custom("BAD_PARAMS".into()), "missing userId/text"))?;
                self.adapter
                    .send(&params.user_id, &params.text)
                    .await
                    .map_err(|e| FrameError::new(ErrorCode::Custom("SEND_FAILED".into()), e))?;
                Ok(None)
            }
            "channel.status" => Ok(Some(serde_json::json!({
                "channel": self.adapter.name(),
                "status": "connected",
            }))),
            "channel.list" => Ok(Some(serde_json::json!([{
                "channel": self.adapter.name(),
                "status": "connected",
            }]))),
            other => Err(FrameError::new(ErrorCode::NoHandler, format!("channel service has no method '{other}'"))),
        }
    }

    #[allow(dead_code)]
    async fn announce(&self) -> Result<(), FrameError> {
        self.client
            .call("sessions", "session.ping", None, GATEWAY_CALL_TIMEOUT)
            .await
            .map(|_| ())
    }
}

struct Dispatcher<C: GatewayConn, A: ChannelAdapter + 'static> {
    inner: tokio::sync::OnceCell<Arc<ChannelService<C, A>>>,
}

#[async_trait]
impl<C: GatewayConn, A: ChannelAdapter + 'static> ServiceHandler for Dispatcher<C, A> {
    async fn handle_event(&self, source: &str, event: &str, payload: Option<Value>) {
        if let Some(service) = self.inner.get() {
            service.handle_event_inner(source, event, payload).await;
        }
    }

    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match self.inner.get() {
            Some(service) => service.handle_request_inner(method, params).await,
            None => Err(FrameError::new(ErrorCode::ServiceUnavailable, "channel service not ready")),
        }
    }
}
