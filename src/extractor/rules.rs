//! Field extraction rules
//!
//! Each field family has its own compiled pattern set. Payout rules run in
//! the fixed order of [`PayoutRule::PRECEDENCE`]; the first rule that fires
//! decides the deal type and the amounts, and later rules are not consulted.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use tracing::trace;

use crate::keywords::KeywordConfig;
use crate::models::DealType;

use super::geo::GeoMatcher;
use super::segmenter::DealBlock;

/// Monetary amount, with optional thousands separators and decimals.
const AMOUNT: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)";
/// Amount that may also group thousands with spaces (`1 000`). Only used
/// where the number sits right before a label or a `+`.
const GROUPED_AMOUNT: &str =
    r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d{1,3}(?: \d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)";
/// Amount of at least two digits, used where no label vouches for the number.
const BARE_AMOUNT: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d{2,}(?:\.\d+)?)";
const CURRENCY: &str = r"[$€£]";
const PERCENT: &str = r"(\d{1,3}(?:[.,]\d+)?)\b";

/// Builds a regex alternation, longest words first so `crg` wins over `cr`.
/// An empty list yields a class that never matches.
pub(crate) fn alternation(words: &[String]) -> String {
    let mut words: Vec<&String> = words.iter().filter(|w| !w.is_empty()).collect();
    if words.is_empty() {
        return r"[^\s\S]".to_string();
    }
    words.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
    words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|")
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Failed to compile {name} pattern"))
}

/// Matches `<label> <amount>` or `<amount> <label>` on one line.
fn labeled_amount(labels: &[String]) -> String {
    let labels = alternation(labels);
    format!(
        r"(?i)\b(?:{labels})\s*[:\-=]?\s*{CURRENCY}?[ \t]*{AMOUNT}|\b{GROUPED_AMOUNT}[ \t]*{CURRENCY}?[ \t]*(?:{labels})\b"
    )
}

fn first_group<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.iter().skip(1).flatten().next().map(|m| m.as_str())
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace([',', ' '], "")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Percentages above 100 are not conversion rates and stay unset.
fn parse_percent(raw: &str) -> Option<f64> {
    raw.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| (0.0..=100.0).contains(value))
}

fn parse_cap(raw: &str) -> Option<u32> {
    raw.trim_end_matches(',').replace(',', "").parse().ok()
}

/// Payout rules in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutRule {
    /// `1300 + 12%`, `CPA 1300 + CRG 12%`
    CpaPlusCrg,
    /// `CPL 35`, `35$ CPL`
    LabeledCpl,
    /// `CPA 900`, `Price: $900`
    LabeledCpa,
    /// `FLAT 500`
    LabeledFlat,
    /// `$900` or a line holding only a number; only tried while no amount is set
    BareAmount,
}

impl PayoutRule {
    pub const PRECEDENCE: [Self; 5] = [
        Self::CpaPlusCrg,
        Self::LabeledCpl,
        Self::LabeledCpa,
        Self::LabeledFlat,
        Self::BareAmount,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::CpaPlusCrg => "cpa_plus_crg",
            Self::LabeledCpl => "labeled_cpl",
            Self::LabeledCpa => "labeled_cpa",
            Self::LabeledFlat => "labeled_flat",
            Self::BareAmount => "bare_amount",
        }
    }
}

/// Outcome of a single payout rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayoutMatch {
    pub deal_type: DealType,
    pub cpa: Option<f64>,
    pub cpl: Option<f64>,
    pub crg: Option<f64>,
}

impl PayoutMatch {
    fn cpa(deal_type: DealType, amount: f64) -> Self {
        Self {
            deal_type,
            cpa: Some(amount),
            cpl: None,
            crg: None,
        }
    }

    fn cpl(amount: f64) -> Self {
        Self {
            deal_type: DealType::Cpl,
            cpa: None,
            cpl: Some(amount),
            crg: None,
        }
    }
}

/// Field values pulled out of one block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub geo: Option<String>,
    pub cpa: Option<f64>,
    pub crg: Option<f64>,
    pub cpl: Option<f64>,
    pub deal_type: DealType,
    pub funnels: Option<String>,
    pub source: Option<String>,
    pub cap: Option<u32>,
}

/// Compiled patterns for every field family
#[derive(Debug)]
pub struct FieldRules {
    cpa_plus_crg: Regex,
    labeled_cpl: Regex,
    labeled_cpa: Regex,
    labeled_flat: Regex,
    currency_amount: Regex,
    amount_line: Regex,
    cpl_word: Regex,
    flat_word: Regex,
    crg: Regex,
    cap: Regex,
    funnel_label: Regex,
    funnel_hint: Regex,
    source_label: Regex,
    source_keyword: Regex,
    source_names: BTreeMap<String, String>,
}

impl FieldRules {
    pub fn new(config: &KeywordConfig) -> Result<Self> {
        let cpa = alternation(&config.cpa_labels);
        let crg = alternation(&config.crg_labels);
        let cap = alternation(&config.cap_labels);
        let units = alternation(&config.cap_units);
        let source_names: BTreeMap<String, String> = config
            .traffic_sources
            .iter()
            .map(|(keyword, label)| (keyword.to_lowercase(), label.clone()))
            .collect();
        let source_keywords: Vec<String> = source_names.keys().cloned().collect();

        Ok(Self {
            cpa_plus_crg: compile(
                "combined payout",
                &format!(
                    r"(?i)(?:\b(?:{cpa})\s*[:\-=]?\s*)?{CURRENCY}?[ \t]*{GROUPED_AMOUNT}[ \t]*{CURRENCY}?[ \t]*\+[ \t]*(?:(?:{crg})[ \t]*[:\-=]?[ \t]*(\d{{1,2}}(?:[.,]\d+)?)\b(?:[ \t]*%)?|(\d{{1,2}}(?:[.,]\d+)?)[ \t]*(?:%|(?:{crg})\b))"
                ),
            )?,
            labeled_cpl: compile("CPL", &labeled_amount(&config.cpl_labels))?,
            labeled_cpa: compile("CPA", &labeled_amount(&config.cpa_labels))?,
            labeled_flat: compile("FLAT", &labeled_amount(&config.flat_labels))?,
            currency_amount: compile(
                "currency amount",
                &format!(
                    r"(?i){CURRENCY}[ \t]*{AMOUNT}|\b{AMOUNT}[ \t]*(?:{CURRENCY}|\b(?:usd|eur|gbp)\b)"
                ),
            )?,
            amount_line: compile("amount line", &format!(r"^\W*{BARE_AMOUNT}\W*$"))?,
            cpl_word: compile(
                "CPL keyword",
                &format!(r"(?i)\b(?:{})\b", alternation(&config.cpl_labels)),
            )?,
            flat_word: compile(
                "FLAT keyword",
                &format!(r"(?i)\b(?:{})\b", alternation(&config.flat_labels)),
            )?,
            crg: compile(
                "conversion rate",
                &format!(
                    r"(?i)\b(?:{crg})[ \t]*[:\-=]?[ \t]*{PERCENT}|\b{PERCENT}[ \t]*%[ \t]*(?:{crg})\b"
                ),
            )?,
            cap: compile(
                "cap",
                &format!(
                    r"(?i)\b(?:{cap})[ \t]*[:\-=]?[ \t]*(?:of[ \t]+|up[ \t]+to[ \t]+)?(\d[\d,]*)|\b(\d[\d,]*)[ \t]*(?:{units})\b|\b(\d[\d,]*)[ \t]*(?:{cap})\b|\b(?:{units})[ \t]*[:\-=]?[ \t]*(\d[\d,]*)"
                ),
            )?,
            funnel_label: compile(
                "funnel label",
                &format!(r"(?i)\b(?:{})\b", alternation(&config.funnel_labels)),
            )?,
            funnel_hint: compile(
                "funnel hint",
                &format!(r"(?i)\b(?:{})\b", alternation(&config.funnel_hints)),
            )?,
            source_label: compile(
                "source label",
                &format!(
                    r"(?i)^\W*(?:{})[ \t]*[:\-–][ \t]*(.+)$",
                    alternation(&config.source_labels)
                ),
            )?,
            source_keyword: compile(
                "traffic source",
                &format!(r"(?i)\b(?:{})\b", alternation(&source_keywords)),
            )?,
            source_names,
        })
    }

    /// Runs every field rule over one block.
    pub fn extract(&self, block: &DealBlock, geo: &GeoMatcher) -> ExtractedFields {
        let text = block.lines.join("\n");
        let mut fields = ExtractedFields {
            geo: block
                .geo_token
                .as_deref()
                .and_then(|token| geo.normalize(token))
                .or_else(|| geo.scan(&text)),
            ..ExtractedFields::default()
        };

        let hit = PayoutRule::PRECEDENCE.into_iter().find_map(|rule| {
            let hit = self.payout(rule, &block.lines, &text)?;
            trace!(rule = rule.name(), "payout rule matched");
            Some(hit)
        });
        if let Some(hit) = hit {
            fields.cpa = hit.cpa;
            fields.cpl = hit.cpl;
            fields.crg = hit.crg;
        }

        if fields.crg.is_none() {
            fields.crg = self.conversion_rate(&text);
        }
        fields.deal_type = self.classify(hit.map(|hit| hit.deal_type), fields.crg.is_some(), &text);

        // A hint word alone is chatter; it only names a funnel inside an actual offer.
        let anchored = fields.geo.is_some() || fields.cpa.is_some() || fields.cpl.is_some();
        fields.funnels = self.funnels(&block.lines, anchored);
        fields.source = self.source(&block.lines);
        fields.cap = self.cap(&text);
        fields
    }

    /// Applies a single payout rule to a block.
    pub fn payout(&self, rule: PayoutRule, lines: &[String], text: &str) -> Option<PayoutMatch> {
        match rule {
            PayoutRule::CpaPlusCrg => {
                let caps = self.cpa_plus_crg.captures(text)?;
                let amount = parse_amount(caps.get(1)?.as_str())?;
                let percent = parse_percent(caps.get(2).or_else(|| caps.get(3))?.as_str())?;
                Some(PayoutMatch {
                    crg: Some(percent),
                    ..PayoutMatch::cpa(DealType::CpaCrg, amount)
                })
            }
            PayoutRule::LabeledCpl => self.labeled(&self.labeled_cpl, text).map(PayoutMatch::cpl),
            PayoutRule::LabeledCpa => self
                .labeled(&self.labeled_cpa, text)
                .map(|amount| PayoutMatch::cpa(DealType::Cpa, amount)),
            PayoutRule::LabeledFlat => self
                .labeled(&self.labeled_flat, text)
                .map(|amount| PayoutMatch::cpa(DealType::Flat, amount)),
            PayoutRule::BareAmount => {
                let amount = lines
                    .iter()
                    .filter(|line| self.may_hold_bare_amount(line))
                    .find_map(|line| {
                        let caps = self
                            .currency_amount
                            .captures(line)
                            .or_else(|| self.amount_line.captures(line))?;
                        parse_amount(first_group(&caps)?)
                    })?;
                if self.cpl_word.is_match(text) {
                    Some(PayoutMatch::cpl(amount))
                } else {
                    Some(PayoutMatch::cpa(DealType::Cpa, amount))
                }
            }
        }
    }

    fn labeled(&self, pattern: &Regex, text: &str) -> Option<f64> {
        pattern
            .captures_iter(text)
            .find_map(|caps| parse_amount(first_group(&caps)?))
    }

    fn may_hold_bare_amount(&self, line: &str) -> bool {
        !line.contains('%')
            && !self.cap.is_match(line)
            && !self.crg.is_match(line)
            && !self.funnel_label.is_match(line)
            && !self.source_label.is_match(line)
    }

    /// Conversion rate given on its own, e.g. `CR 10%` or `8% CRG`.
    pub fn conversion_rate(&self, text: &str) -> Option<f64> {
        self.crg
            .captures_iter(text)
            .find_map(|caps| parse_percent(first_group(&caps)?))
    }

    fn classify(&self, matched: Option<DealType>, has_crg: bool, text: &str) -> DealType {
        match matched {
            None => DealType::Unknown,
            Some(DealType::Cpa) if self.flat_word.is_match(text) => DealType::Flat,
            Some(DealType::Cpa) if has_crg => DealType::CpaCrg,
            Some(kind) => kind,
        }
    }

    /// Funnel names from labeled lines. When `use_hints` is set, falls back to
    /// lines that name a typical funnel.
    pub fn funnels(&self, lines: &[String], use_hints: bool) -> Option<String> {
        let labeled: Vec<&str> = lines
            .iter()
            .filter_map(|line| {
                let label = self.funnel_label.find(line)?;
                let after = match line[label.start()..].find(':') {
                    Some(colon) => &line[label.start() + colon + 1..],
                    None => &line[label.end()..],
                };
                let fragment = trim_fragment(after);
                (!fragment.is_empty()).then_some(fragment)
            })
            .collect();
        if !labeled.is_empty() {
            return Some(labeled.join(", "));
        }
        if !use_hints {
            return None;
        }

        let hinted: Vec<&str> = lines
            .iter()
            .filter(|line| line.chars().count() <= 60 && self.funnel_hint.is_match(line))
            .filter(|line| self.may_hold_bare_amount(line) && !self.carries_payout(line))
            .map(|line| trim_fragment(line))
            .filter(|fragment| !fragment.is_empty())
            .collect();
        (!hinted.is_empty()).then(|| hinted.join(", "))
    }

    fn carries_payout(&self, line: &str) -> bool {
        self.cpa_plus_crg.is_match(line)
            || self.labeled_cpa.is_match(line)
            || self.labeled_cpl.is_match(line)
            || self.labeled_flat.is_match(line)
            || self.currency_amount.is_match(line)
    }

    /// Traffic source from a `Source:` line, or every known traffic keyword in the block.
    pub fn source(&self, lines: &[String]) -> Option<String> {
        if let Some(labeled) = lines.iter().find_map(|line| {
            let caps = self.source_label.captures(line)?;
            let value = trim_fragment(caps.get(1)?.as_str());
            (!value.is_empty()).then(|| value.to_string())
        }) {
            return Some(labeled);
        }

        let found: BTreeSet<&str> = lines
            .iter()
            .flat_map(|line| self.source_keyword.find_iter(line))
            .filter_map(|hit| self.source_names.get(&hit.as_str().to_lowercase()))
            .map(String::as_str)
            .collect();
        (!found.is_empty()).then(|| found.into_iter().collect::<Vec<_>>().join(", "))
    }

    /// Lead cap next to `cap` or a lead unit. Unparseable numbers leave the cap unset.
    pub fn cap(&self, text: &str) -> Option<u32> {
        let caps = self.cap.captures(text)?;
        parse_cap(first_group(&caps)?)
    }
}

fn trim_fragment(raw: &str) -> &str {
    raw.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '-' | '–' | '—' | ':' | '.' | ',' | ';' | '•' | '*')
    })
}
