//! # Telegram Bot API Integration
//!
//! This module receives chat messages through the Telegram Bot API and answers
//! the ones that produced deals.
//!
//! ## Polling
//!
//! Updates are fetched with `getUpdates` long polling. Every batch advances the
//! update offset past the highest `update_id` seen, so Telegram drops updates
//! once they have been handed to the bot. A batch is buffered and handed out one
//! message at a time through [`MessageSource::next_message`].
//!
//! Only text updates reach the bot. Photos, stickers, joins and edits are
//! skipped here, before extraction.
//!
//! ## Sender Labels
//!
//! The sender label is the first available of:
//! - `@username`
//! - the sender's first name
//! - the chat title (channel posts carry no sender)
//! - `Unknown`
//!
//! ## Environment Configuration
//!
//! Set `TELEGRAM_BOT_TOKEN` to the token issued by BotFather.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, error, info};

use crate::models::{
    InboundMessage, RawMessage, TelegramMessage, TelegramResponse, TelegramSendMessage,
    TelegramUpdate,
};
use crate::traits::MessageSource;

const API_BASE: &str = "https://api.telegram.org";

/// Long-polling Telegram client.
///
/// Holds the update offset and the not-yet-delivered part of the last batch.
pub struct TelegramClient {
    client: Client,
    api_url: String,
    poll_timeout_secs: u64,
    offset: i64,
    pending: VecDeque<InboundMessage>,
}

impl TelegramClient {
    pub fn new(token: &str, poll_timeout_secs: u64) -> Result<Self> {
        // The HTTP timeout must outlast the long-poll window.
        let client = Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .build()?;

        Ok(Self {
            client,
            api_url: format!("{API_BASE}/bot{token}"),
            poll_timeout_secs,
            offset: 0,
            pending: VecDeque::new(),
        })
    }

    async fn fetch_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let response: TelegramResponse<Vec<TelegramUpdate>> = self
            .client
            .get(format!("{}/getUpdates", self.api_url))
            .query(&[
                ("offset", self.offset.to_string()),
                ("timeout", self.poll_timeout_secs.to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        into_result(response)
    }

    /// Enqueues the text messages of a batch and advances the offset past all of it.
    fn accept_updates(&mut self, updates: Vec<TelegramUpdate>) {
        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);
            match inbound_from_update(update) {
                Some(message) => self.pending.push_back(message),
                None => debug!("Skipping non-text update"),
            }
        }
    }

    pub async fn send_reply(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let body = TelegramSendMessage {
            chat_id,
            text,
            reply_to_message_id: message_id,
        };

        let response = self
            .client
            .post(format!("{}/sendMessage", self.api_url))
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            info!("Reply sent to chat {}", chat_id);
        } else {
            error!("Failed to send Telegram reply: {}", response.status());
        }

        Ok(())
    }
}

#[async_trait]
impl MessageSource for TelegramClient {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            let updates = self.fetch_updates().await?;
            self.accept_updates(updates);
        }
    }

    async fn acknowledge(&self, message: &InboundMessage, text: &str) -> Result<()> {
        self.send_reply(message.chat_id, message.message_id, text).await
    }
}

fn into_result<T>(response: TelegramResponse<T>) -> Result<T> {
    if !response.ok {
        return Err(anyhow!(
            "Telegram API error: {}",
            response.description.unwrap_or_else(|| "no description".to_string())
        ));
    }
    response
        .result
        .ok_or_else(|| anyhow!("Telegram API returned no result"))
}

/// Converts a text update into an inbound message. Non-text updates yield `None`.
pub fn inbound_from_update(update: TelegramUpdate) -> Option<InboundMessage> {
    let message = update.message.or(update.channel_post)?;
    let text = message.text.clone().filter(|text| !text.trim().is_empty())?;

    Some(InboundMessage {
        chat_id: message.chat.id,
        message_id: message.message_id,
        raw: RawMessage {
            text,
            sender_label: sender_label(&message),
            received_at: DateTime::from_timestamp(message.date, 0).unwrap_or_else(Utc::now),
            chat_is_group: matches!(message.chat.kind.as_str(), "group" | "supergroup"),
        },
    })
}

fn sender_label(message: &TelegramMessage) -> String {
    let from_user = message.from.as_ref().map(|user| match &user.username {
        Some(username) => format!("@{username}"),
        None => user.first_name.clone(),
    });

    from_user
        .filter(|label| !label.trim().is_empty())
        .or_else(|| message.chat.title.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}
