// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Typing indicator helper (spec §4.8): `startTyping` fires immediately and
//! refreshes every 4s until `stopTyping`; both calls are idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

const REFRESH_INTERVAL: Duration = Duration::from_secs(4);

/// Platform hook invoked by the refresh loop. Implemented by a channel
/// adapter's `send_typing` call.
#[async_trait]
pub trait TypingSink: Send + Sync {
    async fn send_typing(&self, user_id: &str);
}

struct Inner {
    active: AtomicBool,
    stop: Notify,
}

/// One handle per user conversation. Calling `start` twice in a row is a
/// no-op; `stop` before any `start` is a no-op.
pub struct TypingIndicator<S: TypingSink + 'static> {
    sink: Arc<S>,
    user_id: String,
    inner: Arc<Inner>,
}

impl<S: TypingSink + 'static> TypingIndicator<S> {
    pub fn new(sink: Arc<S>, user_id: impl Into<String>) -> Self {
        Self {
            sink,
            user_id: user_id.into(),
            inner: Arc::new(Inner {
                active: AtomicBool::new(false),
                stop: Notify::new(),
            }),
        }
    }

    pub async fn start(&self) {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return; // already running
        }
        self.sink.send_typing(&self.user_id).await;

        let sink = self.sink.clone();
        let user_id = self.user_id.clone();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(REFRESH_INTERVAL) => {
                        if !inner.active.load(Ordering::SeqCst) {
                            break;
                        }
                        sink.send_typing(&user_id).await;
                    }
                    _ = inner.stop.notified() => break,
                }
            }
        });
    }

    pub fn stop(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            self.inner.stop.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CountingSink {
        calls: StdMutex<u32>,
    }

    #[async_trait]
    impl TypingSink for CountingSink {
        async fn send_typing(&self, _user_id: &str) {
            *self.calls.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn start_sends_immediately_and_is_idempotent() {
        let sink = Arc::new(CountingSink::default());
        let indicator = TypingIndicator::new(sink.clone(), "u1");
        indicator.start().await;
        indicator.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*sink.calls.lock().unwrap(), 1);
        indicator.stop();
    }

    #[tokio::test]
    async fn stop_before_refresh_prevents_further_calls() {
        let sink = Arc::new(CountingSink::default());
        let indicator = TypingIndicator::new(sink.clone(), "u1");
        indicator.start().await;
        indicator.stop();
        indicator.stop(); // idempotent
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*sink.calls.lock().unwrap(), 1);
    }
}
