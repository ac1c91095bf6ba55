//! Geography markers and normalization

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use regex::Regex;

use crate::keywords::KeywordConfig;

use super::rules::alternation;

/// A line recognized as the start of a geo block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Geo text as written, slash-joined when several codes were listed
    pub token: String,
    /// Remainder of the marker line, if it carried more than the geo
    pub rest: Option<String>,
}

struct Resolved {
    code: String,
    known: bool,
}

/// Resolves geo codes and aliases against the configured allow-list
#[derive(Debug)]
pub struct GeoMatcher {
    codes: BTreeSet<String>,
    aliases: BTreeMap<String, String>,
    reserved: BTreeSet<String>,
    labels: Vec<String>,
    code_scan: Regex,
    alias_scan: Regex,
}

impl GeoMatcher {
    pub fn new(config: &KeywordConfig) -> Result<Self> {
        let codes: BTreeSet<String> = config.geo_codes.iter().map(|c| c.to_uppercase()).collect();
        let aliases: BTreeMap<String, String> = config
            .geo_aliases
            .iter()
            .map(|(alias, code)| (alias.to_lowercase(), code.to_uppercase()))
            .collect();

        // Short aliases (`gb`, `usa`) only count when written in capitals.
        let uppercase_words: Vec<String> = codes
            .iter()
            .cloned()
            .chain(
                aliases
                    .keys()
                    .filter(|alias| alias.chars().count() < 4)
                    .map(|alias| alias.to_uppercase()),
            )
            .collect();
        let long_aliases: Vec<String> = aliases
            .keys()
            .filter(|alias| alias.chars().count() >= 4)
            .cloned()
            .collect();

        let code_scan = Regex::new(&format!(r"\b(?:{})\b", alternation(&uppercase_words)))
            .context("Failed to compile geo code pattern")?;
        let alias_scan = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation(&long_aliases)))
            .context("Failed to compile geo alias pattern")?;

        Ok(Self {
            codes,
            aliases,
            reserved: config.reserved(),
            labels: config.geo_labels.iter().map(|l| l.to_lowercase()).collect(),
            code_scan,
            alias_scan,
        })
    }

    /// Recognizes a geo marker line.
    ///
    /// The line must carry no digits. After stripping leading punctuation and
    /// flags it must open with a known code, an alias, a slash-joined list of
    /// them, or a geo label such as `GEO:`. A capitalized 2-3 letter code
    /// missing from the allow-list only counts when it stands alone.
    pub fn marker(&self, line: &str) -> Option<Marker> {
        if line.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }
        let stripped = line
            .trim_start_matches(|c: char| !c.is_alphabetic())
            .trim_end();
        if stripped.is_empty() {
            return None;
        }

        if let Some(listed) = self.strip_label(stripped) {
            return self.labeled_marker(listed);
        }

        if let Some(marker) = self.spaced_alias_marker(stripped) {
            return Some(marker);
        }

        if let Some(marker) = self.comma_list_marker(stripped) {
            return Some(marker);
        }

        let (head, tail) = stripped
            .split_once(char::is_whitespace)
            .unwrap_or((stripped, ""));
        let token = head.trim_end_matches(|c: char| !c.is_alphanumeric());
        let tail = tail.trim_start_matches(|c: char| !c.is_alphanumeric());

        let parts = token
            .split('/')
            .map(|part| self.resolve_part(part))
            .collect::<Option<Vec<_>>>()?;
        if parts.iter().any(|part| !part.known) && !tail.is_empty() {
            return None;
        }

        Some(Marker {
            token: token.to_string(),
            rest: (!tail.is_empty()).then(|| tail.to_string()),
        })
    }

    /// Normalizes a marker token to canonical codes, slash-joined.
    pub fn normalize(&self, token: &str) -> Option<String> {
        let codes = token
            .split('/')
            .map(|part| self.resolve_part(part).map(|resolved| resolved.code))
            .collect::<Option<Vec<_>>>()?;
        Some(codes.join("/"))
    }

    /// Finds the first allow-listed geo mentioned anywhere in `text`.
    pub fn scan(&self, text: &str) -> Option<String> {
        let hit = match (self.code_scan.find(text), self.alias_scan.find(text)) {
            (Some(code), Some(alias)) if alias.start() < code.start() => alias,
            (Some(code), _) => code,
            (None, alias) => alias?,
        };
        self.resolve_part(hit.as_str()).map(|resolved| resolved.code)
    }

    fn resolve_part(&self, part: &str) -> Option<Resolved> {
        let part = part.trim_matches(|c: char| !c.is_alphanumeric());
        let length = part.chars().count();
        if length < 2 {
            return None;
        }

        let capitalized = part.chars().all(|c| c.is_ascii_uppercase());
        let short_code = capitalized && length <= 3;

        if (length >= 4 || short_code)
            && let Some(code) = self.aliases.get(&part.to_lowercase())
        {
            return Some(Resolved {
                code: code.clone(),
                known: true,
            });
        }

        if capitalized && self.codes.contains(part) {
            return Some(Resolved {
                code: part.to_string(),
                known: true,
            });
        }

        (short_code && !self.reserved.contains(part)).then(|| Resolved {
            code: part.to_string(),
            known: false,
        })
    }

    fn strip_label<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.labels.iter().find_map(|label| {
            let head = line.get(..label.len())?;
            if !head.eq_ignore_ascii_case(label) {
                return None;
            }
            let rest = line[label.len()..].trim_start();
            rest.strip_prefix(':')
                .or_else(|| rest.strip_prefix('-'))
                .map(str::trim)
        })
    }

    fn labeled_marker(&self, listed: &str) -> Option<Marker> {
        let mut codes = Vec::new();
        for chunk in listed.split([',', '/', '|']).map(str::trim).filter(|c| !c.is_empty()) {
            if let Some(resolved) = self.resolve_part(chunk) {
                codes.push(resolved.code);
                continue;
            }
            for word in chunk.split_whitespace() {
                codes.push(self.resolve_part(word)?.code);
            }
        }

        (!codes.is_empty()).then(|| Marker {
            token: codes.join("/"),
            rest: None,
        })
    }

    /// `UK, DE` or `Germany, AT/CH`, where every listed part is a known geo.
    fn comma_list_marker(&self, line: &str) -> Option<Marker> {
        if !line.contains(',') {
            return None;
        }

        let mut parts = Vec::new();
        for chunk in line.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            for part in chunk.split('/') {
                if !self.resolve_part(part)?.known {
                    return None;
                }
                parts.push(part.trim_matches(|c: char| !c.is_alphanumeric()));
            }
        }

        (parts.len() > 1).then(|| Marker {
            token: parts.join("/"),
            rest: None,
        })
    }

    fn spaced_alias_marker(&self, line: &str) -> Option<Marker> {
        self.aliases.keys().filter(|alias| alias.contains(' ')).find_map(|alias| {
            let head = line.get(..alias.len())?;
            if !head.eq_ignore_ascii_case(alias) {
                return None;
            }
            let tail = &line[alias.len()..];
            if tail.chars().next().is_some_and(char::is_alphanumeric) {
                return None;
            }
            let rest = tail.trim_start_matches(|c: char| !c.is_alphanumeric());
            Some(Marker {
                token: head.to_string(),
                rest: (!rest.is_empty()).then(|| rest.to_string()),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> GeoMatcher {
        GeoMatcher::new(&KeywordConfig::default()).unwrap()
    }

    fn token(line: &str) -> Option<String> {
        matcher().marker(line).map(|m| m.token)
    }

    #[test]
    fn recognizes_codes_aliases_and_lists() {
        assert_eq!(token("UK"), Some("UK".to_string()));
        assert_eq!(token("🇩🇪 DE:"), Some("DE".to_string()));
        assert_eq!(token("- LATAM"), Some("LATAM".to_string()));
        assert_eq!(token("DK/SE/NO/FI"), Some("DK/SE/NO/FI".to_string()));
        assert_eq!(token("Germany"), Some("Germany".to_string()));
        assert_eq!(token("United Kingdom - Facebook"), Some("United Kingdom".to_string()));
        assert_eq!(token("GEO: UK, DE"), Some("UK/DE".to_string()));
        assert_eq!(token("UK, DE"), Some("UK/DE".to_string()));
        assert_eq!(token("🇩🇪 Germany, AT/CH"), Some("Germany/AT/CH".to_string()));
    }

    #[test]
    fn comma_lists_need_every_part_known() {
        assert_eq!(token("FB, Google"), None);
        assert_eq!(token("UK, thanks"), Some("UK".to_string()));
        let marker = matcher().marker("UK - Facebook, mostly Quantum AI").unwrap();
        assert_eq!(marker.token, "UK");
    }

    #[test]
    fn rejects_lines_with_digits_or_reserved_words() {
        assert_eq!(token("UK 1400+15%"), None);
        assert_eq!(token("CPA"), None);
        assert_eq!(token("SEO"), None);
        assert_eq!(token("hey, how are you?"), None);
        assert_eq!(token("Funnels: Quantum AI"), None);
        assert_eq!(token("uk"), None);
    }

    #[test]
    fn unknown_codes_only_count_alone() {
        assert_eq!(token("VN"), Some("VN".to_string()));
        assert_eq!(token("HI everyone"), None);
        assert_eq!(token("UK everyone"), Some("UK".to_string()));
    }

    #[test]
    fn marker_keeps_the_rest_of_its_line() {
        let marker = matcher().marker("UK - Facebook, mostly Quantum AI").unwrap();
        assert_eq!(marker.rest.as_deref(), Some("Facebook, mostly Quantum AI"));
    }

    #[test]
    fn normalizes_aliases_to_codes() {
        let geo = matcher();
        assert_eq!(geo.normalize("Germany"), Some("DE".to_string()));
        assert_eq!(geo.normalize("GB/Italy"), Some("UK/IT".to_string()));
        assert_eq!(geo.normalize("latam"), Some("LATAM".to_string()));
        assert_eq!(geo.normalize("CPA"), None);
    }

    #[test]
    fn scan_takes_the_first_mention() {
        let geo = matcher();
        assert_eq!(geo.scan("Deal for germany and UK, CPA 1000"), Some("DE".to_string()));
        assert_eq!(geo.scan("CPA 1000 UK only"), Some("UK".to_string()));
        assert_eq!(geo.scan("nothing here in particular"), None);
    }
}
