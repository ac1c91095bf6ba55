use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::extractor::DealExtractor;
use crate::models::{Deal, InboundMessage, RawMessage};
use crate::traits::{DealSink, MessageSource};

const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct DealBot<S, K> {
    source: S,
    sink: K,
    extractor: DealExtractor,
    reply_on_save: bool,
}

impl<S: MessageSource, K: DealSink> DealBot<S, K> {
    pub fn new(source: S, sink: K, extractor: DealExtractor, reply_on_save: bool) -> Self {
        Self {
            source,
            sink,
            extractor,
            reply_on_save,
        }
    }

    /// Processes messages until the source is exhausted.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.source.next_message().await {
                Ok(Some(message)) => {
                    if let Err(e) = self.handle_message(&message).await {
                        error!("Error handling message {}: {:#}", message.message_id, e);
                    }
                }
                Ok(None) => {
                    info!("Message source closed");
                    return Ok(());
                }
                Err(e) => {
                    error!("Error receiving messages: {:#}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Stores every deal of one message and returns how many rows were new.
    ///
    /// Messages without deals are ignored silently. Deals identical to an
    /// already stored row (a redelivered message, or a geo repeated with the
    /// same terms) are skipped by the sink and not counted.
    pub async fn handle_message(&self, message: &InboundMessage) -> Result<usize> {
        let deals = self.extract_guarded(&message.raw);
        if deals.is_empty() {
            debug!("No deals in message {}", message.message_id);
            return Ok(0);
        }

        let mut stored = 0;
        for deal in &deals {
            if self.sink.append_row(&deal.to_row()).await? {
                stored += 1;
            }
        }
        if stored < deals.len() {
            debug!(
                "Skipped {} duplicate deals in message {}",
                deals.len() - stored,
                message.message_id
            );
        }
        if stored == 0 {
            return Ok(0);
        }

        let geos: Vec<&str> = deals.iter().filter_map(|d| d.geo.as_deref()).collect();
        info!(
            "Stored {} deals from {} ({})",
            stored,
            message.raw.sender_label,
            geos.join(", ")
        );

        if self.reply_on_save {
            let reply = format!("✅ Saved {stored} deal(s)");
            if let Err(e) = self.source.acknowledge(message, &reply).await {
                error!("Error acknowledging message {}: {:#}", message.message_id, e);
            }
        }

        Ok(stored)
    }

    /// A panic inside a rule costs this message its deals, not the bot its loop.
    fn extract_guarded(&self, raw: &RawMessage) -> Vec<Deal> {
        catch_unwind(AssertUnwindSafe(|| self.extractor.extract(raw).collect())).unwrap_or_else(
            |_| {
                error!("Deal extraction panicked; treating message as having no deals");
                Vec::new()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::database::Database;

    #[derive(Default)]
    struct ScriptedSource {
        messages: VecDeque<InboundMessage>,
        replies: Arc<Mutex<Vec<(i64, String)>>>,
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
            Ok(self.messages.pop_front())
        }

        async fn acknowledge(&self, message: &InboundMessage, text: &str) -> Result<()> {
            self.replies
                .lock()
                .unwrap()
                .push((message.message_id, text.to_string()));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MemorySink {
        rows: Arc<Mutex<Vec<Vec<String>>>>,
        fail_on_geo: Option<&'static str>,
    }

    #[async_trait]
    impl DealSink for MemorySink {
        async fn append_row(&self, row: &[String]) -> Result<bool> {
            if self.fail_on_geo == Some(row[2].as_str()) {
                bail!("sheet unavailable");
            }
            self.rows.lock().unwrap().push(row.to_vec());
            Ok(true)
        }
    }

    fn inbound(message_id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            chat_id: -100,
            message_id,
            raw: RawMessage {
                text: text.to_string(),
                sender_label: "@aff".to_string(),
                received_at: Utc::now(),
                chat_is_group: true,
            },
        }
    }

    #[tokio::test]
    async fn stores_deals_in_message_order_and_replies() {
        let source = ScriptedSource::default();
        let replies = source.replies.clone();
        let sink = MemorySink::default();
        let rows = sink.rows.clone();
        let bot = DealBot::new(source, sink, DealExtractor::with_defaults().unwrap(), true);

        let stored = bot
            .handle_message(&inbound(1, "UK\nCPA 1000\nDE\nCPA 1200"))
            .await
            .unwrap();

        assert_eq!(stored, 2);
        let rows = rows.lock().unwrap();
        assert_eq!(rows[0][2], "UK");
        assert_eq!(rows[1][2], "DE");
        assert_eq!(
            *replies.lock().unwrap(),
            vec![(1, "✅ Saved 2 deal(s)".to_string())]
        );
    }

    #[tokio::test]
    async fn duplicate_rows_are_not_counted_or_acknowledged() {
        let source = ScriptedSource::default();
        let replies = source.replies.clone();
        let database = Database::in_memory().await.unwrap();
        let bot = DealBot::new(
            source,
            database.clone(),
            DealExtractor::with_defaults().unwrap(),
            true,
        );
        let message = inbound(7, "UK\nCPA 1000\nUK\nCPA 1000");

        assert_eq!(bot.handle_message(&message).await.unwrap(), 1);
        assert_eq!(bot.handle_message(&message).await.unwrap(), 0);

        assert_eq!(database.count().await.unwrap(), 1);
        assert_eq!(
            *replies.lock().unwrap(),
            vec![(7, "✅ Saved 1 deal(s)".to_string())]
        );
    }

    #[tokio::test]
    async fn chatter_is_ignored_without_a_reply() {
        let source = ScriptedSource::default();
        let replies = source.replies.clone();
        let sink = MemorySink::default();
        let rows = sink.rows.clone();
        let bot = DealBot::new(source, sink, DealExtractor::with_defaults().unwrap(), true);

        for text in ["hey, how are you?", "hey bot, how are you?", "I love this new app"] {
            assert_eq!(bot.handle_message(&inbound(2, text)).await.unwrap(), 0);
        }
        let stored = bot.handle_message(&inbound(3, "thanks!")).await.unwrap();

        assert_eq!(stored, 0);
        assert!(rows.lock().unwrap().is_empty());
        assert!(replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_keeps_going_after_a_failed_message() {
        let source = ScriptedSource {
            messages: VecDeque::from(vec![
                inbound(1, "UK\nCPA 1000"),
                inbound(2, "hello there"),
                inbound(3, "DE\nCPA 1200"),
            ]),
            ..ScriptedSource::default()
        };
        let replies = source.replies.clone();
        let sink = MemorySink {
            fail_on_geo: Some("UK"),
            ..MemorySink::default()
        };
        let rows = sink.rows.clone();
        let mut bot = DealBot::new(source, sink, DealExtractor::with_defaults().unwrap(), false);

        bot.run().await.unwrap();

        let rows = rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][2], "DE");
        assert!(replies.lock().unwrap().is_empty());
    }
}
