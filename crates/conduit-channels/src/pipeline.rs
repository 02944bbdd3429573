// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Channel ingress pipeline (spec §4.8): allowlist gate, dedupe cache,
//! per-user debouncer, routing. Every adapter is built on top of the same
//! pipeline; only connect/send/typing are platform-specific.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(120);
const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(1500);
const DEFAULT_MAX_BATCH: usize = 32;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub allow_from: HashSet<String>,
    pub dedupe_ttl: Duration,
    pub debounce_delay: Duration,
    pub max_batch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allow_from: HashSet::new(),
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
            debounce_delay: DEFAULT_DEBOUNCE_DELAY,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

/// A raw inbound message as an adapter receives it from the platform.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub metadata: Option<Value>,
}

/// Receives exactly one call per debounced batch, matching the teacher's
/// `onInboundMessage(channel, userId, text, metadata?)` routing callback.
#[async_trait]
pub trait RoutingSink: Send + Sync {
    async fn on_inbound_message(&self, channel: &str, user_id: &str, text: String, metadata: Option<Value>);
}

struct DebounceBatch {
    lines: Vec<String>,
    metadata: Option<Value>,
    generation: u64,
}

/// Owns the dedupe cache and the per-user debounce batches for one channel.
/// Cloning shares state (`Arc` internally) so the adapter and its background
/// eviction/flush tasks can hold independent handles.
pub struct IngressPipeline {
    channel: String,
    config: PipelineConfig,
    seen: Mutex<HashMap<String, Instant>>,
    batches: Mutex<HashMap<String, DebounceBatch>>,
    sink: Arc<dyn RoutingSink>,
}

impl IngressPipeline {
    pub fn new(channel: impl Into<String>, config: PipelineConfig, sink: Arc<dyn RoutingSink>) -> Arc<Self> {
        Arc::new(Self {
            channel: channel.into(),
            config,
            seen: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
            sink,
        })
    }

    /// Runs a message through allowlist → dedupe → debounce. On a flush
    /// (hard batch limit or, via [`Self::spawn_flush_timer`], the rolling
    /// timer) `RoutingSink::on_inbound_message` fires exactly once.
    pub async fn accept(self: &Arc<Self>, msg: InboundMessage) {
        if !self.config.allow_from.is_empty() && !self.config.allow_from.contains(&msg.user_id) {
            trace!(channel = %self.channel, user = %msg.user_id, "rejected by allowlist");
            return;
        }

        {
            let mut seen = self.seen.lock().await;
            self.evict_expired(&mut seen);
            if seen.contains_key(&msg.id) {
                trace!(channel = %self.channel, id = %msg.id, "dropped duplicate");
                return;
            }
            seen.insert(msg.id.clone(), Instant::now());
        }

        let should_flush_now = {
            let mut batches = self.batches.lock().await;
            let batch = batches.entry(msg.user_id.clone()).or_insert_with(|| DebounceBatch {
                lines: Vec::new(),
                metadata: None,
                generation: 0,
            });
            batch.lines.push(msg.text);
            batch.metadata = msg.metadata.or_else(|| batch.metadata.take());
            batch.generation += 1;
            batch.lines.len() >= self.config.max_batch
        };

        if should_flush_now {
            self.flush(&msg.user_id).await;
        } else {
            self.spawn_flush_timer(msg.user_id.clone());
        }
    }

    fn spawn_flush_timer(self: &Arc<Self>, user_id: String) {
        let pipeline = self.clone();
        let delay = self.config.debounce_delay;
        tokio::spawn(async move {
            let generation_at_schedule = {
                let batches = pipeline.batches.lock().await;
                batches.get(&user_id).map(|b| b.generation)
            };
            tokio::time::sleep(delay).await;
            let still_current = {
                let batches = pipeline.batches.lock().await;
                batches.get(&user_id).map(|b| b.generation) == generation_at_schedule
            };
            if still_current {
                pipeline.flush(&user_id).await;
            }
        });
    }

    async fn flush(self: &Arc<Self>, user_id: &str) {
        let batch = { self.batches.lock().await.remove(user_id) };
        let Some(batch) = batch else { return };
        if batch.lines.is_empty() {
            return;
        }
        let text = batch.lines.join("\n");
        self.sink.on_inbound_message(&self.channel, user_id, text, batch.metadata).await;
    }

    fn evict_expired(&self, seen: &mut HashMap<String, Instant>) {
        let ttl = self.config.dedupe_ttl;
        let now = Instant::now();
        seen.retain(|_, inserted| now.duration_since(*inserted) < ttl);
    }
}
