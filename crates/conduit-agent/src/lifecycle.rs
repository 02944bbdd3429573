// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent Lifecycle (spec §4.7): owns run identity, cancellation, and
//! streaming. Knows nothing about transport or model providers — it is the
//! bookkeeping core the agent service drives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use tracing::debug;

/// Cooperative cancellation handle. Mirrors the `oneshot`-based cancel
/// channel the teacher's `Agent::submit_with_cancel` observes at await
/// points, generalized to a flag + notify so many checks can share it.
#[derive(Clone)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Suspend until the signal fires. Returns immediately if already fired.
    pub async fn cancelled(&self) {
        if self.aborted() {
            return;
        }
        self.notify.notified().await;
    }
}

struct ActiveRun {
    session_key: String,
    started_at: DateTime<Utc>,
    abort: AbortSignal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStartEvent {
    pub run_id: String,
    pub session_key: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEndEvent {
    pub run_id: String,
    pub session_key: String,
    pub duration_ms: i64,
    pub tokens: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunErrorEvent {
    pub run_id: String,
    pub session_key: String,
    pub duration_ms: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunDeltaEvent {
    pub run_id: String,
    pub session_key: String,
    #[serde(flatten)]
    pub kind: RunDeltaKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunDeltaKind {
    Assistant { text: String, is_complete: bool },
    Tool { tool_name: String, phase: String, args: Option<Value> },
    Compaction { tokens_before: u64, summary: String },
}

/// Everything the lifecycle needs to publish; kept as a trait so
/// `conduit_agent` doesn't depend directly on the gateway client wiring.
#[async_trait::async_trait]
pub trait LifecycleSink: Send + Sync {
    async fn emit_run_start(&self, ev: RunStartEvent);
    async fn emit_run_end(&self, ev: RunEndEvent);
    async fn emit_run_error(&self, ev: RunErrorEvent);
    async fn emit_run_delta(&self, ev: RunDeltaEvent);
}

/// Owns the active-run registry. `runId` is process-unique (spec §3).
pub struct Lifecycle {
    runs: RwLock<HashMap<String, ActiveRun>>,
    sink: Arc<dyn LifecycleSink>,
}

impl Lifecycle {
    pub fn new(sink: Arc<dyn LifecycleSink>) -> Arc<Self> {
        Arc::new(Self {
            runs: RwLock::new(HashMap::new()),
            sink,
        })
    }

    pub async fn start_run(&self, run_id: &str, session_key: &str) -> AbortSignal {
        let abort = AbortSignal::new();
        let started_at = Utc::now();
        self.runs.write().await.insert(
            run_id.to_string(),
            ActiveRun {
                session_key: session_key.to_string(),
                started_at,
                abort: abort.clone(),
            },
        );
        self.sink
            .emit_run_start(RunStartEvent {
                run_id: run_id.to_string(),
                session_key: session_key.to_string(),
                started_at,
            })
            .await;
        abort
    }

    pub async fn end_run(&self, run_id: &str, tokens: Option<Value>) {
        let Some(run) = self.runs.write().await.remove(run_id) else {
            return; // unknown runId: silent no-op
        };
        let duration_ms = (Utc::now() - run.started_at).num_milliseconds();
        self.sink
            .emit_run_end(RunEndEvent {
                run_id: run_id.to_string(),
                session_key: run.session_key,
                duration_ms,
                tokens,
            })
            .await;
    }

    pub async fn error_run(&self, run_id: &str, error: impl Into<String>) {
        let Some(run) = self.runs.write().await.remove(run_id) else {
            return;
        };
        let duration_ms = (Utc::now() - run.started_at).num_milliseconds();
        self.sink
            .emit_run_error(RunErrorEvent {
                run_id: run_id.to_string(),
                session_key: run.session_key,
                duration_ms,
                error: error.into(),
            })
            .await;
    }

    /// Triggers the cancellation handle and removes the run. Returns `true`
    /// iff the run was active.
    pub async fn abort_run(&self, run_id: &str) -> bool {
        let Some(run) = self.runs.write().await.remove(run_id) else {
            return false;
        };
        run.abort.trigger();
        debug!(run_id, "run aborted");
        true
    }

    /// Aborts every run whose registered session matches. Returns the count aborted.
    pub async fn abort_session_runs(&self, session_key: &str) -> usize {
        let mut runs = self.runs.write().await;
        let to_abort: Vec<String> = runs
            .iter()
            .filter(|(_, r)| r.session_key == session_key)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &to_abort {
            if let Some(run) = runs.remove(id) {
                run.abort.trigger();
            }
        }
        to_abort.len()
    }

    pub async fn list_active_runs(&self) -> Vec<String> {
        self.runs.read().await.keys().cloned().collect()
    }

    pub async fn get_abort_signal(&self, run_id: &str) -> Option<AbortSignal> {
        self.runs.read().await.get(run_id).map(|r| r.abort.clone())
    }

    async fn session_of(&self, run_id: &str) -> Option<String> {
        self.runs.read().await.get(run_id).map(|r| r.session_key.clone())
    }

    /// Emits a streaming event only if `run_id` is still active; unknown
    /// runIds are silent no-ops (spec §4.7).
    pub async fn stream_assistant(&self, run_id: &str, text: impl Into<String>, is_complete: bool) {
        let Some(session_key) = self.session_of(run_id).await else {
            return;
        };
        self.sink
            .emit_run_delta(RunDeltaEvent {
                run_id: run_id.to_string(),
                session_key,
                kind: RunDeltaKind::Assistant {
                    text: text.into(),
                    is_complete,
                },
            })
            .await;
    }

    pub async fn stream_tool(&self, run_id: &str, tool_name: impl Into<String>, phase: impl Into<String>, args: Option<Value>) {
        let Some(session_key) = self.session_of(run_id).await else {
            return;
        };
        self.sink
            .emit_run_delta(RunDeltaEvent {
                run_id: run_id.to_string(),
                session_key,
                kind: RunDeltaKind::Tool {
                    tool_name: tool_name.into(),
                    phase: phase.into(),
                    args,
                },
            })
            .await;
    }

    pub async fn stream_compaction(&self, run_id: &str, tokens_before: u64, summary: impl Into<String>) {
        let Some(session_key) = self.session_of(run_id).await else {
            return;
        };
        self.sink
            .emit_run_delta(RunDeltaEvent {
                run_id: run_id.to_string(),
                session_key,
                kind: RunDeltaKind::Compaction {
                    tokens_before,
                    summary: summary.into(),
                },
            })
            .await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        starts: StdMutex<Vec<RunStartEvent>>,
        ends: StdMutex<Vec<RunEndEvent>>,
        errors: StdMutex<Vec<RunErrorEvent>>,
        deltas: StdMutex<Vec<RunDeltaEvent>>,
    }

    #[async_trait::async_trait]
    impl LifecycleSink for RecordingSink {
        async fn emit_run_start(&self, ev: RunStartEvent) {
            self.starts.lock().unwrap().push(ev);
        }
        async fn emit_run_end(&self, ev: RunEndEvent) {
            self.ends.lock().unwrap().push(ev);
        }
        async fn emit_run_error(&self, ev: RunErrorEvent) {
            self.errors.lock().unwrap().push(ev);
        }
        async fn emit_run_delta(&self, ev: RunDeltaEvent) {
            self.deltas.lock().unwrap().push(ev);
        }
    }

    #[tokio::test]
    async fn start_then_end_emits_both_events() {
        let sink = Arc::new(RecordingSink::default());
        let lifecycle = Lifecycle::new(sink.clone());
        lifecycle.start_run("r1", "cli:x").await;
        lifecycle.end_run("r1", None).await;

        assert_eq!(sink.starts.lock().unwrap().len(), 1);
        assert_eq!(sink.ends.lock().unwrap().len(), 1);
        assert!(lifecycle.list_active_runs().await.is_empty());
    }

    #[tokio::test]
    async fn end_run_on_unknown_id_is_silent_noop() {
        let sink = Arc::new(RecordingSink::default());
        let lifecycle = Lifecycle::new(sink.clone());
        lifecycle.end_run("nope", None).await;
        assert!(sink.ends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abort_propagates_and_second_abort_returns_false() {
        let sink = Arc::new(RecordingSink::default());
        let lifecycle = Lifecycle::new(sink);
        let abort = lifecycle.start_run("r1", "s").await;

        assert!(lifecycle.abort_run("r1").await);
        assert!(!lifecycle.abort_run("r1").await);
        assert!(abort.aborted());

        // Late stream calls after removal are silent no-ops.
        lifecycle.stream_assistant("r1", "late", true).await;
    }

    #[tokio::test]
    async fn stream_calls_on_unknown_run_are_silent() {
        let sink = Arc::new(RecordingSink::default());
        let lifecycle = Lifecycle::new(sink.clone());
        lifecycle.stream_assistant("ghost", "x", true).await;
        lifecycle.stream_tool("ghost", "read", "start", None).await;
        lifecycle.stream_compaction("ghost", 10, "summary").await;
        assert!(sink.deltas.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abort_session_runs_aborts_only_matching_sessions() {
        let sink = Arc::new(RecordingSink::default());
        let lifecycle = Lifecycle::new(sink);
        lifecycle.start_run("r1", "s1").await;
        lifecycle.start_run("r2", "s1").await;
        lifecycle.start_run("r3", "s2").await;

        let aborted = lifecycle.abort_session_runs("s1").await;
        assert_eq!(aborted, 2);
        assert_eq!(lifecycle.list_active_runs().await, vec!["r3".to_string()]);
    }

    #[tokio::test]
    async fn error_run_removes_and_emits() {
        let sink = Arc::new(RecordingSink::default());
        let lifecycle = Lifecycle::new(sink.clone());
        lifecycle.start_run("r1", "s").await;
        lifecycle.error_run("r1", "TIMEOUT").await;
        assert_eq!(sink.errors.lock().unwrap()[0].error, "TIMEOUT");
        assert!(lifecycle.get_abort_signal("r1").await.is_none());
    }
}
