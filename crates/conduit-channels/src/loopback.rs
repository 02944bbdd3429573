// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `LoopbackChannel`: an in-memory `ChannelAdapter` used by the CLI's `chat`
//! surface and by integration tests. Outbound sends are recorded instead of
//! reaching a platform, and inbound messages are pushed directly by the
//! caller (there's no network to poll).

use std::sync::Mutex;

use async_trait::async_trait;

use crate::adapter::ChannelAdapter;

#[derive(Default)]
pub struct LoopbackChannel {
    sent: Mutex<Vec<(String, String)>>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(user_id, text)` pair sent so far, in order.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for LoopbackChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn connect(&self) -> Result<(), String> {
        Ok(())
    }

    async fn send(&self, user_id: &str, text: &str) -> Result<(), String> {
        self.sent.lock().unwrap().push((user_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_typing(&self, _user_id: &str) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sends_in_order() {
        let channel = LoopbackChannel::new();
        channel.send("u", "a").await.unwrap();
        channel.send("u", "b").await.unwrap();
        assert_eq!(
            channel.sent_messages(),
            vec![("u".to_string(), "a".to_string()), ("u".to_string(), "b".to_string())]
        );
    }
}
