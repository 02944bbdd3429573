// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! End-to-end tests exercising the assembled Gateway plus sessions, agent
//! and channel services together. Per-service and per-invariant behavior
//! (routing uniqueness, event fan-out, abort propagation, cron skip hooks,
//! session-per-key serialization, delivery chunking) has dedicated coverage
//! in each owning crate; what's distinctive here is the cross-crate wiring
//! a real deployment relies on.

use std::sync::Arc;
use std::time::Duration;

use conduit_agent::service::{AgentService, AgentServiceConfig};
use conduit_agent::runtime::MockAgentRuntime;
use conduit_channels::loopback::LoopbackChannel;
use conduit_channels::pipeline::{InboundMessage, PipelineConfig};
use conduit_channels::service::ChannelService;
use conduit_channels::delivery::DeliveryOptions;
use conduit_gateway::{Gateway, InProcessConn};
use conduit_session::service::SessionsService;
use conduit_session::store::FileSessionStore;

async fn assemble(
    workspace: &std::path::Path,
) -> (Arc<ChannelService<InProcessConn, LoopbackChannel>>, Arc<LoopbackChannel>) {
    let handle = Gateway::spawn(Duration::from_secs(5));
    let store = FileSessionStore::open(workspace.join("sessions")).await.unwrap();

    let sessions_conn = InProcessConn::connect(handle.clone()).await;
    let _sessions = SessionsService::connect(sessions_conn, store.clone()).await.unwrap();

    let agent_conn = InProcessConn::connect(handle.clone()).await;
    let agent_config = AgentServiceConfig {
        workspace_dir: workspace.display().to_string(),
        model: "mock".to_string(),
        provider: "mock".to_string(),
        system_prompt: String::new(),
        tools: Vec::new(),
    };
    let _agent = AgentService::connect(agent_conn, Arc::new(MockAgentRuntime), store.clone(), agent_config).await.unwrap();

    let adapter = Arc::new(LoopbackChannel::new());
    let channel_conn = InProcessConn::connect(handle.clone()).await;
    let channel = ChannelService::connect(channel_conn, adapter.clone(), PipelineConfig::default(), DeliveryOptions::default()).await.unwrap();

    (channel, adapter)
}

/// A full inbound message, once debounced, reaches the agent and produces
/// a reply delivered back out through the same channel adapter.
#[tokio::test]
async fn chat_round_trip_through_full_stack() {
    let dir = tempfile::tempdir().unwrap();
    let (channel, adapter) = assemble(dir.path()).await;

    channel
        .accept_inbound(InboundMessage {
            id: "m1".to_string(),
            user_id: "tester".to_string(),
            text: "hello there".to_string(),
            metadata: None,
        })
        .await;

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let sent = adapter.sent_messages();
    assert_eq!(sent.len(), 1, "expected exactly one reply, got {sent:?}");
    assert_eq!(sent[0].0, "tester");
    assert!(sent[0].1.contains("hello there"), "mock runtime should echo the input: {:?}", sent[0].1);
}

/// Two distinct users produce two independently delivered replies; a
/// duplicate message id for the same user is dropped before it ever
/// reaches the agent.
#[tokio::test]
async fn duplicate_inbound_id_does_not_double_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (channel, adapter) = assemble(dir.path()).await;

    let msg = InboundMessage {
        id: "dup".to_string(),
        user_id: "u1".to_string(),
        text: "first".to_string(),
        metadata: None,
    };
    channel.accept_inbound(msg.clone()).await;
    channel.accept_inbound(msg).await; // same id, should be deduped

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let sent = adapter.sent_messages();
    assert_eq!(sent.len(), 1, "duplicate message id must not produce a second reply: {sent:?}");
}
