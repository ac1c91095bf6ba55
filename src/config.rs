//! Runtime settings read from the environment

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};

use crate::extractor::{ExtractOptions, LeadingLines};

const DEFAULT_DATABASE_URL: &str = "sqlite:database/deals.db";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub telegram_token: String,
    pub database_url: String,
    pub keywords_path: Option<PathBuf>,
    pub extract: ExtractOptions,
    pub reply_on_save: bool,
    pub poll_timeout_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let telegram_token = get("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

        let leading_lines = match get("LEADING_LINES").as_deref().map(str::trim) {
            None => LeadingLines::default(),
            Some(value) if value.eq_ignore_ascii_case("drop") => LeadingLines::Drop,
            Some(value) if value.eq_ignore_ascii_case("implicit") => LeadingLines::Implicit,
            Some(other) => return Err(anyhow!("LEADING_LINES must be drop or implicit, got {other}")),
        };

        Ok(Self {
            telegram_token,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            keywords_path: get("KEYWORDS_PATH").map(PathBuf::from),
            extract: ExtractOptions {
                leading_lines,
                raw_message_limit: parse_var(get("RAW_MESSAGE_MAX_CHARS"), "RAW_MESSAGE_MAX_CHARS")?,
            },
            reply_on_save: parse_flag(get("REPLY_ON_SAVE"), "REPLY_ON_SAVE")?.unwrap_or(true),
            poll_timeout_secs: parse_var(get("POLL_TIMEOUT_SECS"), "POLL_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
        })
    }
}

fn parse_var<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| anyhow!("{key} must be a non-negative integer, got {v}"))
        })
        .transpose()
}

fn parse_flag(value: Option<String>, key: &str) -> Result<Option<bool>> {
    value
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("{key} must be true or false, got {v}")),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_token_is_set() {
        let settings = settings(&[("TELEGRAM_BOT_TOKEN", "123:abc")]).unwrap();

        assert_eq!(settings.telegram_token, "123:abc");
        assert_eq!(settings.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(settings.keywords_path, None);
        assert_eq!(settings.extract, ExtractOptions::default());
        assert!(settings.reply_on_save);
        assert_eq!(settings.poll_timeout_secs, 30);
    }

    #[test]
    fn reads_every_variable() {
        let settings = settings(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("KEYWORDS_PATH", "keywords.json"),
            ("LEADING_LINES", "Implicit"),
            ("RAW_MESSAGE_MAX_CHARS", "500"),
            ("REPLY_ON_SAVE", "off"),
            ("POLL_TIMEOUT_SECS", "10"),
        ])
        .unwrap();

        assert_eq!(settings.database_url, "sqlite::memory:");
        assert_eq!(settings.keywords_path, Some(PathBuf::from("keywords.json")));
        assert_eq!(settings.extract.leading_lines, LeadingLines::Implicit);
        assert_eq!(settings.extract.raw_message_limit, Some(500));
        assert!(!settings.reply_on_save);
        assert_eq!(settings.poll_timeout_secs, 10);
    }

    #[test]
    fn rejects_missing_token_and_bad_values() {
        assert!(settings(&[]).is_err());
        assert!(settings(&[("TELEGRAM_BOT_TOKEN", "  ")]).is_err());
        assert!(settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("LEADING_LINES", "keep")]).is_err());
        assert!(settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("RAW_MESSAGE_MAX_CHARS", "-1")]).is_err());
        assert!(settings(&[("TELEGRAM_BOT_TOKEN", "t"), ("REPLY_ON_SAVE", "maybe")]).is_err());
    }
}
