// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-session FIFO message queue (spec §4.6): guarantees at most one
//! drainer runs per `sessionKey` at a time, while `enqueue` may be called
//! concurrently from many callers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::store::MessageRole;

#[derive(Debug, thiserror::Error, Clone)]
pub enum RunError {
    #[error("queue cleared before this message ran")]
    QueueCleared,
    #[error("{0}")]
    Execution(String),
}

pub type RunResult = Result<Value, RunError>;

/// One message waiting on a session's FIFO.
pub struct QueuedMessage {
    pub id: u64,
    pub session_key: String,
    pub content: String,
    pub role: MessageRole,
    pub metadata: Option<Value>,
    resolve: oneshot::Sender<RunResult>,
}

/// Hook the drainer invokes for every popped message. Implemented by the
/// agent service (spec §4.7); kept as a trait object here so the queue
/// itself stays free of any model/runtime dependency.
#[async_trait]
pub trait ExecuteHook: Send + Sync {
    async fn execute(&self, msg: &QueuedMessage) -> RunResult;
}

struct SessionQueue {
    pending: VecDeque<QueuedMessage>,
    running: bool,
}

impl Default for SessionQueue {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            running: false,
        }
    }
}

/// Owns one FIFO + drainer state per `sessionKey`.
pub struct SessionMessageQueue {
    queues: Mutex<HashMap<String, SessionQueue>>,
    next_id: std::sync::atomic::AtomicU64,
    hook: Arc<dyn ExecuteHook>,
}

impl SessionMessageQueue {
    pub fn new(hook: Arc<dyn ExecuteHook>) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
            hook,
        })
    }

    /// Enqueue a message; if no drainer is active for this key, start one.
    pub async fn enqueue(
        self: &Arc<Self>,
        session_key: &str,
        content: String,
        role: MessageRole,
        metadata: Option<Value>,
    ) -> oneshot::Receiver<RunResult> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let msg = QueuedMessage {
            id,
            session_key: session_key.to_string(),
            content,
            role,
            metadata,
            resolve: tx,
        };

        let mut start_drainer = false;
        {
            let mut queues = self.queues.lock().await;
            let queue = queues.entry(session_key.to_string()).or_default();
            queue.pending.push_back(msg);
            if !queue.running {
                queue.running = true;
                start_drainer = true;
            }
        }

        if start_drainer {
            let this = self.clone();
            let key = session_key.to_string();
            tokio::spawn(async move { this.drain(key).await });
        }

        rx
    }

    async fn drain(self: Arc<Self>, session_key: String) {
        loop {
            let next = {
                let mut queues = self.queues.lock().await;
                let Some(queue) = queues.get_mut(&session_key) else {
                    return;
                };
                queue.pending.pop_front()
            };

            let Some(msg) = next else {
                let mut queues = self.queues.lock().await;
                if let Some(queue) = queues.get_mut(&session_key) {
                    queue.running = false;
                    if queue.pending.is_empty() {
                        queues.remove(&session_key);
                    }
                }
                return;
            };

            debug!(session = %session_key, message_id = msg.id, "draining queued message");
            let result = self.hook.execute(&msg).await;
            // Failures of one message never block or fail others.
            let _ = msg.resolve.send(result);
        }
    }

    pub async fn has_queued_messages(&self, key: &str) -> bool {
        self.queues.lock().await.get(key).map(|q| !q.pending.is_empty()).unwrap_or(false)
    }

    pub async fn is_running(&self, key: &str) -> bool {
        self.queues.lock().await.get(key).map(|q| q.running).unwrap_or(false)
    }

    pub async fn queue_length(&self, key: &str) -> usize {
        self.queues.lock().await.get(key).map(|q| q.pending.len()).unwrap_or(0)
    }

    /// Reject every pending future with [`RunError::QueueCleared`] and
    /// discard the FIFO; a drainer already mid-execute finishes its current
    /// message but finds the queue empty on its next pop.
    pub async fn clear_queue(&self, key: &str) {
        let mut queues = self.queues.lock().await;
        if let Some(mut queue) = queues.remove(key) {
            while let Some(msg) = queue.pending.pop_front() {
                let _ = msg.resolve.send(Err(RunError::QueueCleared));
            }
            if queue.running {
                // Leave the running flag state to the in-flight drainer; it
                // will find no entry for this key and exit cleanly.
                warn!(session = %key, "cleared queue while a drainer was active");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, Duration};

    struct RecordingHook {
        order: StdMutex<Vec<String>>,
        fail_content: Option<String>,
    }

    #[async_trait]
    impl ExecuteHook for RecordingHook {
        async fn execute(&self, msg: &QueuedMessage) -> RunResult {
            sleep(Duration::from_millis(10)).await;
            self.order.lock().unwrap().push(msg.content.clone());
            if self.fail_content.as_deref() == Some(msg.content.as_str()) {
                return Err(RunError::Execution("boom".into()));
            }
            Ok(Value::Bool(true))
        }
    }

    #[tokio::test]
    async fn messages_execute_in_enqueue_order() {
        let hook = Arc::new(RecordingHook {
            order: StdMutex::new(Vec::new()),
            fail_content: None,
        });
        let queue = SessionMessageQueue::new(hook.clone());
        let r1 = queue.enqueue("s", "one".into(), MessageRole::User, None).await;
        let r2 = queue.enqueue("s", "two".into(), MessageRole::User, None).await;

        r1.await.unwrap().unwrap();
        r2.await.unwrap().unwrap();
        assert_eq!(*hook.order.lock().unwrap(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn at_most_one_drainer_releases_running_flag_when_empty() {
        let hook = Arc::new(RecordingHook {
            order: StdMutex::new(Vec::new()),
            fail_content: None,
        });
        let queue = SessionMessageQueue::new(hook);
        let r = queue.enqueue("s", "one".into(), MessageRole::User, None).await;
        r.await.unwrap().unwrap();

        sleep(Duration::from_millis(20)).await;
        assert!(!queue.is_running("s").await);
        assert!(!queue.has_queued_messages("s").await);
    }

    #[tokio::test]
    async fn different_sessions_run_independently() {
        let started = Arc::new(AtomicUsize::new(0));
        struct ConcurrentHook {
            started: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl ExecuteHook for ConcurrentHook {
            async fn execute(&self, _msg: &QueuedMessage) -> RunResult {
                self.started.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(30)).await;
                Ok(Value::Bool(true))
            }
        }
        let queue = SessionMessageQueue::new(Arc::new(ConcurrentHook { started: started.clone() }));
        let _ = queue.enqueue("a", "x".into(), MessageRole::User, None).await;
        let _ = queue.enqueue("b", "y".into(), MessageRole::User, None).await;

        sleep(Duration::from_millis(10)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2, "sessions a and b should drain concurrently");
    }

    #[tokio::test]
    async fn one_message_failure_does_not_block_the_next() {
        let hook = Arc::new(RecordingHook {
            order: StdMutex::new(Vec::new()),
            fail_content: Some("bad".into()),
        });
        let queue = SessionMessageQueue::new(hook);
        let r1 = queue.enqueue("s", "bad".into(), MessageRole::User, None).await;
        let r2 = queue.enqueue("s", "good".into(), MessageRole::User, None).await;

        assert!(matches!(r1.await.unwrap(), Err(RunError::Execution(_))));
        assert!(r2.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn clear_queue_rejects_pending_futures() {
        struct NeverRuns;
        #[async_trait]
        impl ExecuteHook for NeverRuns {
            async fn execute(&self, _msg: &QueuedMessage) -> RunResult {
                sleep(Duration::from_secs(10)).await;
                Ok(Value::Bool(true))
            }
        }
        let queue = SessionMessageQueue::new(Arc::new(NeverRuns));
        let in_flight = queue.enqueue("s", "running".into(), MessageRole::User, None).await;
        sleep(Duration::from_millis(5)).await; // let it start draining
        let pending = queue.enqueue("s", "queued".into(), MessageRole::User, None).await;

        queue.clear_queue("s").await;
        assert!(matches!(pending.await.unwrap(), Err(RunError::QueueCleared)));
        drop(in_flight); // the in-flight message's hook never resolves in this test
    }
}
