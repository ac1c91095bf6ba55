//! # Deal Extraction
//!
//! Turns one free-form chat message into zero or more [`Deal`] records.
//!
//! Extraction runs in three stages:
//!
//! 1. **Segmentation** ([`segmenter`]): the message is split into blocks,
//!    one per geo marker line (`UK`, `🇩🇪 DE`, `DK/SE/NO/FI`, `GEO: UK, DE`).
//! 2. **Field rules** ([`rules`]): each block is scanned for payout, conversion
//!    rate, funnels, traffic source and cap using an ordered rule list.
//! 3. **Assembly**: blocks that carry a geo, an amount or a funnel become
//!    deals stamped with the sender and receive time of the message.
//!
//! The extractor holds only immutable compiled patterns, so one instance can
//! be shared across tasks and called any number of times on the same input
//! with identical results.

pub mod geo;
pub mod rules;
pub mod segmenter;

use anyhow::Result;
use tracing::debug;

use crate::keywords::KeywordConfig;
use crate::models::{Deal, RawMessage};

use self::geo::GeoMatcher;
use self::rules::{ExtractedFields, FieldRules};
use self::segmenter::{Blocks, DealBlock};

pub use self::segmenter::LeadingLines;

/// Extraction behaviour that is not keyword data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractOptions {
    pub leading_lines: LeadingLines,
    /// Truncate `raw_message` to this many characters
    pub raw_message_limit: Option<usize>,
}

/// Compiled extractor built from a keyword configuration
#[derive(Debug)]
pub struct DealExtractor {
    geo: GeoMatcher,
    rules: FieldRules,
    options: ExtractOptions,
}

impl DealExtractor {
    /// Compiles every pattern up front. This is the only fallible step;
    /// extraction itself cannot fail.
    pub fn new(keywords: &KeywordConfig, options: ExtractOptions) -> Result<Self> {
        Ok(Self {
            geo: GeoMatcher::new(keywords)?,
            rules: FieldRules::new(keywords)?,
            options,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(&KeywordConfig::default(), ExtractOptions::default())
    }

    /// Extracts the deals of one message, in message order.
    ///
    /// The returned iterator is lazy and borrows the message; call `extract`
    /// again to start over.
    pub fn extract<'a>(&'a self, raw: &'a RawMessage) -> impl Iterator<Item = Deal> + 'a {
        Blocks::new(&raw.text, &self.geo, self.options.leading_lines)
            .filter_map(move |block| self.assemble(&block, raw))
    }

    fn assemble(&self, block: &DealBlock, raw: &RawMessage) -> Option<Deal> {
        let fields = self.rules.extract(block, &self.geo);
        if !is_acceptable(&fields) {
            debug!(
                "Dropping block without geo, payout or funnels ({} lines)",
                block.lines.len()
            );
            return None;
        }

        Some(Deal {
            received_at: raw.received_at,
            sender_label: raw.sender_label.clone(),
            geo: fields.geo,
            cpa: fields.cpa,
            crg: fields.crg,
            cpl: fields.cpl,
            deal_type: fields.deal_type,
            funnels: fields.funnels,
            source: fields.source,
            cap: fields.cap,
            raw_message: truncate_chars(&raw.text, self.options.raw_message_limit),
        })
    }
}

fn is_acceptable(fields: &ExtractedFields) -> bool {
    fields.geo.is_some() || fields.cpa.is_some() || fields.cpl.is_some() || fields.funnels.is_some()
}

fn truncate_chars(text: &str, limit: Option<usize>) -> String {
    match limit.and_then(|max| text.char_indices().nth(max)) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DealType;
    use chrono::Utc;

    fn message(text: &str) -> RawMessage {
        RawMessage {
            text: text.to_string(),
            sender_label: "@network_am".to_string(),
            received_at: Utc::now(),
            chat_is_group: true,
        }
    }

    #[test]
    fn full_offer_yields_every_field() {
        let extractor = DealExtractor::with_defaults().unwrap();
        let raw = message(
            "🇬🇧 UK\n1300 + 12%\nFunnels: Quantum AI, Bitcoin Era\nSource: FB\nCap: 30 leads",
        );

        let deals: Vec<Deal> = extractor.extract(&raw).collect();

        assert_eq!(deals.len(), 1);
        let deal = &deals[0];
        assert_eq!(deal.geo.as_deref(), Some("UK"));
        assert_eq!(deal.cpa, Some(1300.0));
        assert_eq!(deal.crg, Some(12.0));
        assert_eq!(deal.deal_type, DealType::CpaCrg);
        assert_eq!(deal.funnels.as_deref(), Some("Quantum AI, Bitcoin Era"));
        assert_eq!(deal.source.as_deref(), Some("FB"));
        assert_eq!(deal.cap, Some(30));
        assert_eq!(deal.sender_label, "@network_am");
        assert_eq!(deal.received_at, raw.received_at);
        assert_eq!(deal.raw_message, raw.text);
    }

    #[test]
    fn geo_less_payout_is_still_a_deal() {
        let extractor = DealExtractor::with_defaults().unwrap();
        let raw = message("CPL 35 for everyone");

        let deals: Vec<Deal> = extractor.extract(&raw).collect();

        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].geo, None);
        assert_eq!(deals[0].cpl, Some(35.0));
        assert_eq!(deals[0].deal_type, DealType::Cpl);
    }

    #[test]
    fn raw_message_respects_the_limit() {
        let extractor = DealExtractor::new(
            &KeywordConfig::default(),
            ExtractOptions {
                raw_message_limit: Some(9),
                ..ExtractOptions::default()
            },
        )
        .unwrap();
        let raw = message("🇩🇪 DE\nCPA 1000");

        let deal = extractor.extract(&raw).next().unwrap();

        assert_eq!(deal.raw_message, "🇩🇪 DE\nCPA");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("שלום עולם", Some(4)), "שלום");
        assert_eq!(truncate_chars("short", Some(50)), "short");
        assert_eq!(truncate_chars("short", None), "short");
    }
}
