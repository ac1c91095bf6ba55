//! Interfaces to the chat platform and the deal store

use anyhow::Result;
use async_trait::async_trait;

use crate::models::InboundMessage;

/// Source of inbound text messages
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Waits for the next text message.
    ///
    /// # Returns
    /// * `Ok(None)` - The source is exhausted and no more messages will arrive
    async fn next_message(&mut self) -> Result<Option<InboundMessage>>;

    /// Replies to a message the bot has processed
    async fn acknowledge(&self, _message: &InboundMessage, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Persistent tabular store that accepts one row per deal
#[async_trait]
pub trait DealSink: Send + Sync {
    /// Appends a row laid out in [`crate::models::DEAL_COLUMNS`] order.
    ///
    /// # Returns
    /// * `Ok(false)` - An identical row was already stored and nothing was written
    async fn append_row(&self, row: &[String]) -> Result<bool>;
}
