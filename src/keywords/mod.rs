//! Keyword and alias sets that drive deal extraction
//!
//! Every list the extractor matches against lives here as data. The built-in
//! defaults cover English and Hebrew affiliate chatter; a JSON file can
//! replace any subset of them without touching the extraction rules.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Keyword configuration loaded once at startup and shared by every extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Canonical geography codes, uppercase (`UK`, `DE`, `LATAM`)
    pub geo_codes: Vec<String>,
    /// Lowercase alias mapped to a canonical code (`germany` -> `DE`)
    pub geo_aliases: BTreeMap<String, String>,
    /// Line labels that introduce an explicit geo list (`GEO: UK, DE`)
    pub geo_labels: Vec<String>,
    /// Uppercase words that look like codes but never name a geography
    pub reserved_tokens: Vec<String>,
    pub cpa_labels: Vec<String>,
    pub cpl_labels: Vec<String>,
    pub flat_labels: Vec<String>,
    pub crg_labels: Vec<String>,
    pub funnel_labels: Vec<String>,
    /// Words that typically end a funnel name (`Quantum AI`, `Profit App`)
    pub funnel_hints: Vec<String>,
    pub source_labels: Vec<String>,
    /// Lowercase traffic keyword mapped to the label recorded on the deal
    pub traffic_sources: BTreeMap<String, String>,
    pub cap_labels: Vec<String>,
    pub cap_units: Vec<String>,
}

impl KeywordConfig {
    /// Parses a JSON keyword file. Sets missing from the document keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse keyword configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keyword file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid keyword file {}", path.display()))
    }

    /// Uppercase tokens that must never open a geo block.
    ///
    /// Besides the configured reserved words this includes every short label
    /// and traffic keyword, so a line reading `SEO` or `CPA` is not taken for
    /// a country code.
    pub fn reserved(&self) -> BTreeSet<String> {
        let short_words = self
            .cpa_labels
            .iter()
            .chain(&self.cpl_labels)
            .chain(&self.flat_labels)
            .chain(&self.crg_labels)
            .chain(&self.cap_labels)
            .chain(&self.funnel_hints)
            .chain(&self.geo_labels)
            .chain(self.traffic_sources.keys())
            .filter(|word| word.chars().count() <= 3);

        self.reserved_tokens
            .iter()
            .chain(short_words)
            .map(|word| word.to_uppercase())
            .collect()
    }
}

fn strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_string()).collect()
}

fn pairs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            geo_codes: strings(&[
                "UK", "DE", "ES", "FR", "IT", "PL", "CA", "US", "BR", "PH", "IN", "MY", "ZA",
                "CH", "AT", "CZ", "NL", "IE", "FI", "NO", "DK", "SE", "AU", "TR", "JP", "TH",
                "BE", "GR", "PT", "SK", "IL", "MX", "CL", "CO", "AR", "NZ", "SG", "AE", "HU",
                "RO", "GCC", "MENA", "CIS", "APAC", "ASIA", "LATAM", "NORDICS", "BALTICS",
                "SCANDINAVIA",
            ]),
            geo_aliases: pairs(&[
                ("gb", "UK"),
                ("united kingdom", "UK"),
                ("great britain", "UK"),
                ("britain", "UK"),
                ("england", "UK"),
                ("germany", "DE"),
                ("spain", "ES"),
                ("france", "FR"),
                ("italy", "IT"),
                ("poland", "PL"),
                ("canada", "CA"),
                ("usa", "US"),
                ("united states", "US"),
                ("brazil", "BR"),
                ("philippines", "PH"),
                ("india", "IN"),
                ("malaysia", "MY"),
                ("south africa", "ZA"),
                ("switzerland", "CH"),
                ("austria", "AT"),
                ("czech republic", "CZ"),
                ("czechia", "CZ"),
                ("netherlands", "NL"),
                ("holland", "NL"),
                ("ireland", "IE"),
                ("finland", "FI"),
                ("norway", "NO"),
                ("denmark", "DK"),
                ("sweden", "SE"),
                ("australia", "AU"),
                ("turkey", "TR"),
                ("japan", "JP"),
                ("thailand", "TH"),
                ("belgium", "BE"),
                ("greece", "GR"),
                ("portugal", "PT"),
                ("slovakia", "SK"),
                ("israel", "IL"),
                ("mexico", "MX"),
                ("chile", "CL"),
                ("colombia", "CO"),
                ("argentina", "AR"),
                ("new zealand", "NZ"),
                ("singapore", "SG"),
                ("hungary", "HU"),
                ("romania", "RO"),
                ("latam", "LATAM"),
                ("mena", "MENA"),
                ("apac", "APAC"),
                ("asia", "ASIA"),
                ("nordics", "NORDICS"),
                ("nordic", "NORDICS"),
                ("baltics", "BALTICS"),
                ("scandinavia", "SCANDINAVIA"),
            ]),
            geo_labels: strings(&["geo", "geos", "country", "countries", "מדינה", "מדינות", "איזור"]),
            reserved_tokens: strings(&[
                "CPA", "CPL", "CRG", "CR", "CG", "CAP", "FTD", "KPI", "NEW", "HOT", "TOP", "VIP",
                "API", "USD", "EUR", "GBP", "ALL", "AND", "THE", "FOR", "OK", "PM", "AM", "DM",
                "RS", "REV",
            ]),
            cpa_labels: strings(&["cpa", "price", "payout", "מחיר", "תשלום"]),
            cpl_labels: strings(&["cpl", "מחיר לליד"]),
            flat_labels: strings(&["flat", "מחיר קבוע"]),
            crg_labels: strings(&[
                "crg",
                "cr",
                "cg",
                "conversion rate",
                "conversion",
                "המרה",
                "אחוזי המרה",
            ]),
            funnel_labels: strings(&[
                "mix of funnels",
                "funnels",
                "funnel",
                "mostly",
                "landing",
                "קישור",
                "לינק",
            ]),
            funnel_hints: strings(&[
                "ai", "app", "bank", "bot", "matrix", "edge", "phantom", "trader", "profit",
            ]),
            source_labels: strings(&["traffic source", "source", "traffic", "מקור", "פלטפורמה"]),
            traffic_sources: pairs(&[
                ("seo", "SEO"),
                ("ppc", "PPC"),
                ("native", "Native"),
                ("taboola", "Taboola"),
                ("outbrain", "Outbrain"),
                ("google", "Google"),
                ("gg", "Google"),
                ("facebook", "Facebook"),
                ("fb", "Facebook"),
                ("meta", "Facebook"),
                ("youtube", "YouTube"),
                ("tiktok", "TikTok"),
                ("reddit", "Reddit"),
                ("bing", "Bing"),
                ("push", "Push"),
                ("display", "Display"),
                ("email", "Email"),
                ("mail", "Email"),
                ("search", "Search"),
                ("content", "Content"),
                ("sms", "SMS"),
                ("influencer", "Influencer"),
                ("influencers", "Influencer"),
                ("media buy", "Media Buy"),
                ("media buying", "Media Buy"),
                ("banners", "Display"),
                ("call center", "Call Center"),
            ]),
            cap_labels: strings(&["daily cap", "caps", "cap", "תקרה", "מקסימום"]),
            cap_units: strings(&["leads", "lead", "ftds", "ftd", "conversions"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = KeywordConfig::from_json(
            r#"{ "geo_codes": ["UK", "DE"], "traffic_sources": { "snap": "Snapchat" } }"#,
        )
        .unwrap();

        assert_eq!(config.geo_codes, vec!["UK", "DE"]);
        assert_eq!(config.traffic_sources.get("snap").map(String::as_str), Some("Snapchat"));
        assert!(!config.traffic_sources.contains_key("seo"));
        assert_eq!(config.cpa_labels, KeywordConfig::default().cpa_labels);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(KeywordConfig::from_json("{ geo_codes: ").is_err());
        assert!(KeywordConfig::load("/nonexistent/keywords.json").is_err());
    }

    #[test]
    fn reserved_covers_short_labels_and_sources() {
        let reserved = KeywordConfig::default().reserved();

        for word in ["CPA", "CPL", "SEO", "PPC", "FB", "AI", "GEO", "CAP", "CRG"] {
            assert!(reserved.contains(word), "{word} should be reserved");
        }
        assert!(!reserved.contains("UK"));
        assert!(!reserved.contains("GOOGLE"));
    }

    #[test]
    fn defaults_carry_the_full_keyword_lists() {
        let config = KeywordConfig::default();

        assert!(config.funnel_labels.iter().any(|label| label == "לינק"));
        for keyword in ["search", "content", "mail", "email"] {
            assert!(config.traffic_sources.contains_key(keyword), "{keyword} missing");
        }
        assert_eq!(config.traffic_sources.get("mail").map(String::as_str), Some("Email"));
    }
}
