//! Data models for inbound messages, extracted deals and Telegram API payloads

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column order of a stored deal row.
pub const DEAL_COLUMNS: [&str; 11] = [
    "timestamp",
    "sender_label",
    "geo",
    "cpa",
    "crg",
    "cpl",
    "deal_type",
    "funnels",
    "source",
    "cap",
    "raw_message",
];

/// A text message as delivered by the chat platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub text: String,
    pub sender_label: String,
    pub received_at: DateTime<Utc>,
    pub chat_is_group: bool,
}

/// A raw message together with the transport ids needed to answer it
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub raw: RawMessage,
}

/// Payout classification of a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DealType {
    #[serde(rename = "CPA")]
    Cpa,
    #[serde(rename = "CPA + CRG")]
    CpaCrg,
    #[serde(rename = "CPL")]
    Cpl,
    #[serde(rename = "FLAT")]
    Flat,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl DealType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpa => "CPA",
            Self::CpaCrg => "CPA + CRG",
            Self::Cpl => "CPL",
            Self::Flat => "FLAT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealType {
    type Err = RowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "CPA" => Ok(Self::Cpa),
            "CPA + CRG" => Ok(Self::CpaCrg),
            "CPL" => Ok(Self::Cpl),
            "FLAT" => Ok(Self::Flat),
            "UNKNOWN" | "" => Ok(Self::Unknown),
            other => Err(RowError::DealType(other.to_string())),
        }
    }
}

/// One advertising offer extracted from a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub received_at: DateTime<Utc>,
    pub sender_label: String,
    pub geo: Option<String>,
    pub cpa: Option<f64>,
    pub crg: Option<f64>,
    pub cpl: Option<f64>,
    pub deal_type: DealType,
    pub funnels: Option<String>,
    pub source: Option<String>,
    pub cap: Option<u32>,
    pub raw_message: String,
}

/// Errors raised while decoding a stored row back into a [`Deal`]
#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    #[error("invalid number in column {column}: {value}")]
    Number { column: &'static str, value: String },
    #[error("unknown deal type: {0}")]
    DealType(String),
}

impl Deal {
    /// Serializes the deal in [`DEAL_COLUMNS`] order. Absent fields become empty strings.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.received_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.sender_label.clone(),
            self.geo.clone().unwrap_or_default(),
            format_optional(self.cpa),
            format_optional(self.crg),
            format_optional(self.cpl),
            self.deal_type.to_string(),
            self.funnels.clone().unwrap_or_default(),
            self.source.clone().unwrap_or_default(),
            format_optional(self.cap),
            self.raw_message.clone(),
        ]
    }

    /// Decodes a row produced by [`Deal::to_row`].
    pub fn from_row(row: &[String]) -> Result<Self, RowError> {
        if row.len() != DEAL_COLUMNS.len() {
            return Err(RowError::ColumnCount {
                expected: DEAL_COLUMNS.len(),
                found: row.len(),
            });
        }

        let received_at = DateTime::parse_from_rfc3339(&row[0])
            .map_err(|_| RowError::Timestamp(row[0].clone()))?
            .with_timezone(&Utc);

        Ok(Self {
            received_at,
            sender_label: row[1].clone(),
            geo: non_empty(&row[2]),
            cpa: parse_optional(&row[3], "cpa")?,
            crg: parse_optional(&row[4], "crg")?,
            cpl: parse_optional(&row[5], "cpl")?,
            deal_type: row[6].parse()?,
            funnels: non_empty(&row[7]),
            source: non_empty(&row[8]),
            cap: parse_optional(&row[9], "cap")?,
            raw_message: row[10].clone(),
        })
    }
}

fn format_optional<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_optional<T: FromStr>(value: &str, column: &'static str) -> Result<Option<T>, RowError> {
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| RowError::Number {
        column,
        value: value.to_string(),
    })
}

/// Envelope returned by every Telegram Bot API method
#[derive(Debug, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

/// One entry of a `getUpdates` result
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub channel_post: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    /// Unix time in seconds
    pub date: i64,
    pub text: Option<String>,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

/// `sendMessage` request body
#[derive(Debug, Serialize)]
pub struct TelegramSendMessage<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    pub reply_to_message_id: i64,
}
