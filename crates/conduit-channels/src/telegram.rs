// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Sketch of a Telegram `ChannelAdapter`. The bot polling loop (receiving
//! updates and feeding them into an `IngressPipeline`) is the platform
//! integration surface the spec treats as an external collaborator — this
//! only shows the connect/send/typing calls a real adapter would supply.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatAction;

use crate::adapter::ChannelAdapter;

pub struct TelegramChannel {
    bot: Bot,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>) -> Self {
        Self { bot: Bot::new(token.into()) }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn connect(&self) -> Result<(), String> {
        self.bot.get_me().await.map(|_| ()).map_err(|e| e.to_string())
    }

    async fn send(&self, user_id: &str, text: &str) -> Result<(), String> {
        let chat_id: i64 = user_id.parse().map_err(|_| format!("invalid telegram chat id '{user_id}'"))?;
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn send_typing(&self, user_id: &str) -> Result<(), String> {
        let chat_id: i64 = user_id.parse().map_err(|_| format!("invalid telegram chat id '{user_id}'"))?;
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
