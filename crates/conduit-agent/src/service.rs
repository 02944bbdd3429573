// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The Gateway-registered agent service: subscribes to `message.received`
//! and `cron.trigger`, drives messages through the session queue, and owns
//! the glue between the [`Lifecycle`] and an injected [`AgentRuntime`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};

use conduit_gateway::{GatewayConn, ServiceClient, ServiceHandler};
use conduit_protocol::{ErrorCode, FrameError, ServiceRegistration};
use conduit_session::{key, ListFilter, MessageFilter, MessageRole, Session, SessionKind, SessionStore};

use crate::lifecycle::{AbortSignal, Lifecycle, LifecycleSink, RunDeltaEvent, RunEndEvent, RunErrorEvent, RunStartEvent};
use crate::runtime::{AgentRuntime, RunCallbacks, RunOutcome, RunRequest};
use conduit_session::queue::{ExecuteHook, QueuedMessage, RunError, RunResult, SessionMessageQueue};

const GATEWAY_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default model/provider used when a session has no explicit override;
/// real values come from `conduit-config` in the assembled binary.
#[derive(Debug, Clone)]
pub struct AgentServiceConfig {
    pub workspace_dir: String,
    pub model: String,
    pub provider: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
}

/// Forwards lifecycle events to the gateway as `run.*` Events.
struct GatewayLifecycleSink<C: GatewayConn> {
    client: Arc<ServiceClient<C>>,
}

#[async_trait]
impl<C: GatewayConn> LifecycleSink for GatewayLifecycleSink<C> {
    async fn emit_run_start(&self, ev: RunStartEvent) {
        let _ = self.client.emit("run.start", serde_json::to_value(&ev).ok()).await;
    }
    async fn emit_run_end(&self, ev: RunEndEvent) {
        let _ = self.client.emit("run.end", serde_json::to_value(&ev).ok()).await;
    }
    async fn emit_run_error(&self, ev: RunErrorEvent) {
        let _ = self.client.emit("run.error", serde_json::to_value(&ev).ok()).await;
    }
    async fn emit_run_delta(&self, ev: RunDeltaEvent) {
        let _ = self.client.emit("run.delta", serde_json::to_value(&ev).ok()).await;
    }
}

struct HookCallbacks {
    lifecycle: Arc<Lifecycle>,
    run_id: String,
}

#[async_trait]
impl RunCallbacks for HookCallbacks {
    async fn on_assistant_delta(&self, text: &str, is_complete: bool) {
        self.lifecycle.stream_assistant(&self.run_id, text, is_complete).await;
    }
    async fn on_tool_call(&self, name: &str, phase: &str, args: Option<Value>) {
        self.lifecycle.stream_tool(&self.run_id, name, phase, args).await;
    }
    async fn on_compaction(&self, tokens_before: u64, summary: &str) {
        self.lifecycle.stream_compaction(&self.run_id, tokens_before, summary).await;
    }
}

/// Run counters surfaced through `agent.stats`; cheap enough to bump on
/// every turn without a lock.
#[derive(Default)]
struct AgentStats {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
}

/// Drains the session queue: for each message, runs a full agent turn.
struct AgentExecuteHook {
    lifecycle: Arc<Lifecycle>,
    runtime: Arc<dyn AgentRuntime>,
    store: Arc<dyn SessionStore>,
    config: AgentServiceConfig,
    stats: Arc<AgentStats>,
}

#[async_trait]
impl ExecuteHook for AgentExecuteHook {
    async fn execute(&self, msg: &QueuedMessage) -> RunResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.stats.runs_started.fetch_add(1, Ordering::Relaxed);
        let abort: AbortSignal = self.lifecycle.start_run(&run_id, &msg.session_key).await;

        let prior = self
            .store
            .get_messages(&msg.session_key, MessageFilter::default())
            .await
            .unwrap_or_default();

        let request = RunRequest {
            session_key: msg.session_key.clone(),
            workspace_dir: self.config.workspace_dir.clone(),
            model: self.config.model.clone(),
            provider: self.config.provider.clone(),
            api_key: None,
            base_url: None,
            prior_messages: prior,
            system_prompt: self.config.system_prompt.clone(),
            tools: self.config.tools.clone(),
        };

        let callbacks = Arc::new(HookCallbacks {
            lifecycle: self.lifecycle.clone(),
            run_id: run_id.clone(),
        });

        let outcome: RunOutcome = self.runtime.run(request, abort.clone(), callbacks).await;

        if abort.aborted() {
            self.lifecycle.error_run(&run_id, "aborted").await;
            return Err(RunError::QueueCleared);
        }

        if outcome.success {
            if let Some(response) = &outcome.response {
                if let Err(e) = self
                    .store
                    .add_message(&msg.session_key, MessageRole::Assistant, response.clone(), None)
                    .await
                {
                    warn!(session = %msg.session_key, error = %e, "failed to persist assistant reply");
                }
            }
            self.stats.runs_completed.fetch_add(1, Ordering::Relaxed);
            self.lifecycle.end_run(&run_id, outcome.tokens.clone()).await;
            Ok(serde_json::to_value(&outcome).unwrap_or(Value::Null))
        } else {
            self.stats.runs_failed.fetch_add(1, Ordering::Relaxed);
            let err = outcome.error.clone().unwrap_or_else(|| "unknown agent error".to_string());
            self.lifecycle.error_run(&run_id, err.clone()).await;
            Err(RunError::Execution(err))
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageReceived {
    channel: String,
    #[serde(rename = "userId")]
    user_id: String,
    content: String,
    #[serde(default, rename = "sessionKey")]
    session_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionDeleted {
    #[serde(rename = "sessionKey")]
    session_key: String,
}

#[derive(Debug, Deserialize)]
struct CronTrigger {
    #[serde(rename = "taskId")]
    task_id: String,
    #[serde(default, rename = "sessionKey")]
    session_key: Option<String>,
    #[serde(default)]
    notify: Option<String>,
}

/// Gateway-registered service driving the agent lifecycle end to end.
pub struct AgentService<C: GatewayConn> {
    client: Arc<ServiceClient<C>>,
    lifecycle: Arc<Lifecycle>,
    queue: Arc<SessionMessageQueue>,
    store: Arc<dyn SessionStore>,
    stats: Arc<AgentStats>,
}

impl<C: GatewayConn> AgentService<C> {
    pub async fn connect(conn: Arc<C>, runtime: Arc<dyn AgentRuntime>, store: Arc<dyn SessionStore>, config: AgentServiceConfig) -> Result<Arc<Self>, FrameError> {
        // `ServiceClient::connect` needs a handler up front, but the handler
        // (this service) needs the client to emit lifecycle events. Route
        // dispatch through a cell that's filled in once construction
        // finishes, rather than restructure `ServiceClient` around a
        // two-phase handshake.
        let registration = ServiceRegistration::new("agent")
            .with_methods(["agent.abort", "agent.status", "agent.run", "agent.stats"])
            .with_subscriptions(["message.received", "cron.trigger", "session.deleted"]);

        let dispatcher = Arc::new(Dispatcher {
            inner: tokio::sync::OnceCell::new(),
        });
        let client = ServiceClient::connect(conn, registration, dispatcher.clone()).await?;

        let sink = Arc::new(GatewayLifecycleSink { client: client.clone() });
        let lifecycle = Lifecycle::new(sink);
        let stats = Arc::new(AgentStats::default());

        let hook = Arc::new(AgentExecuteHook {
            lifecycle: lifecycle.clone(),
            runtime,
            store: store.clone(),
            config,
            stats: stats.clone(),
        });
        let queue = SessionMessageQueue::new(hook);

        let service = Arc::new(Self {
            client,
            lifecycle,
            queue,
            store,
            stats,
        });
        let _ = dispatcher.inner.set(service.clone());

        Ok(service)
    }

    async fn handle_event_inner(&self, _source: &str, event: &str, payload: Option<Value>) {
        match event {
            "message.received" => self.on_message_received(payload).await,
            "cron.trigger" => self.on_cron_trigger(payload).await,
            "session.deleted" => {
                if let Some(payload) = payload {
                    if let Ok(deleted) = serde_json::from_value::<SessionDeleted>(payload) {
                        self.lifecycle.abort_session_runs(&deleted.session_key).await;
                    }
                }
            }
            _ => {}
        }
    }

    async fn handle_request_inner(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match method {
            "agent.abort" => {
                #[derive(Deserialize)]
                struct AbortParams {
                    #[serde(rename = "runId")]
                    run_id: String,
                }
                let params: AbortParams = params
                    .and_then(|v| serde_json::from_value(v).ok())
                    .ok_or_else(|| FrameError::new(ErrorCode::Custom("BAD_PARAMS".into()), "missing runId"))?;
                let aborted = self.abort_run(&params.run_id).await;
                Ok(Some(serde_json::json!({ "aborted": aborted })))
            }
            "agent.status" => Ok(Some(serde_json::json!({ "activeRuns": self.lifecycle.list_active_runs().await }))),
            "agent.run" => {
                #[derive(Deserialize)]
                struct RunParams {
                    #[serde(default, rename = "sessionKey")]
                    session_key: Option<String>,
                    task: String,
                }
                let params: RunParams = params
                    .and_then(|v| serde_json::from_value(v).ok())
                    .ok_or_else(|| FrameError::new(ErrorCode::Custom("BAD_PARAMS".into()), "missing task"))?;
                let session_key = params.session_key.unwrap_or_else(|| key::cron_key("manual", &chrono::Utc::now().timestamp().to_string()));
                self.ensure_session(&session_key, SessionKind::Main).await;
                if let Err(e) = self.store.add_message(&session_key, MessageRole::User, params.task.clone(), None).await {
                    error!(session = %session_key, error = %e, "failed to append manually-run task");
                }
                let _ = self.queue.enqueue(&session_key, params.task, MessageRole::User, None).await;
                Ok(Some(serde_json::json!({ "sessionKey": session_key })))
            }
            "agent.stats" => Ok(Some(serde_json::json!({
                "activeRuns": self.lifecycle.list_active_runs().await.len(),
                "runsStarted": self.stats.runs_started.load(Ordering::Relaxed),
                "runsCompleted": self.stats.runs_completed.load(Ordering::Relaxed),
                "runsFailed": self.stats.runs_failed.load(Ordering::Relaxed),
            }))),
            other => Err(FrameError::new(ErrorCode::NoHandler, format!("agent service has no method '{other}'"))),
        }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    async fn ensure_session(&self, session_key: &str, kind: SessionKind) {
        let params = serde_json::json!({ "sessionKey": session_key, "kind": kind });
        let _ = self.client.call("sessions", "session.create", Some(params), GATEWAY_CALL_TIMEOUT).await;
        let _ = self.store.create(Session::new(session_key, kind, chrono::Utc::now())).await;
    }

    async fn on_message_received(&self, payload: Option<Value>) {
        let Some(payload) = payload else { return };
        let parsed: Result<MessageReceived, _> = serde_json::from_value(payload);
        let Ok(msg) = parsed else {
            warn!("malformed message.received payload");
            return;
        };

        let session_key = msg
            .session_key
            .unwrap_or_else(|| key::channel_key(&msg.channel, &msg.user_id));

        self.ensure_session(&session_key, SessionKind::Main).await;
        if let Err(e) = self.store.add_message(&session_key, MessageRole::User, msg.content.clone(), None).await {
            error!(session = %session_key, error = %e, "failed to append inbound message");
        }

        let _ = self.queue.enqueue(&session_key, msg.content, MessageRole::User, None).await;
    }

    async fn on_cron_trigger(&self, payload: Option<Value>) {
        let Some(payload) = payload else { return };
        let parsed: Result<CronTrigger, _> = serde_json::from_value(payload);
        let Ok(trigger) = parsed else {
            warn!("malformed cron.trigger payload");
            return;
        };

        let session_key = trigger
            .session_key
            .unwrap_or_else(|| key::cron_key(&trigger.task_id, &chrono::Utc::now().timestamp().to_string()));

        self.ensure_session(&session_key, SessionKind::Cron).await;
        let content = trigger.notify.unwrap_or_else(|| format!("cron:{}", trigger.task_id));
        if let Err(e) = self.store.add_message(&session_key, MessageRole::System, content.clone(), None).await {
            error!(session = %session_key, error = %e, "failed to append cron trigger message");
        }
        let _ = self.queue.enqueue(&session_key, content, MessageRole::System, None).await;
    }

    pub async fn abort_run(&self, run_id: &str) -> bool {
        self.lifecycle.abort_run(run_id).await
    }

    pub async fn list_sessions(&self, filter: ListFilter) -> Vec<Session> {
        self.store.list(filter).await.unwrap_or_default()
    }
}

/// Routes gateway dispatch to the `AgentService` once it exists. Frames
/// arriving before `connect()` finishes constructing the service (there are
/// none, in practice — the gateway has no one to route to yet) are dropped.
struct Dispatcher<C: GatewayConn> {
    inner: tokio::sync::OnceCell<Arc<AgentService<C>>>,
}

#[async_trait]
impl<C: GatewayConn> ServiceHandler for Dispatcher<C> {
    async fn handle_event(&self, source: &str, event: &str, payload: Option<Value>) {
        if let Some(service) = self.inner.get() {
            service.handle_event_inner(source, event, payload).await;
        }
    }

    async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, FrameError> {
        match self.inner.get() {
            Some(service) => service.handle_request_inner(method, params).await,
            None => Err(FrameError::new(ErrorCode::ServiceUnavailable, "agent service not ready")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
