//! Splits a message into one block per geo marker

use std::str::Lines;

use super::geo::GeoMatcher;

/// Marker lines shorter than this with nothing under them are headers for the next block.
const HEADER_MAX_CHARS: usize = 6;

/// What happens to lines that appear before the first geo marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeadingLines {
    /// Discard them.
    #[default]
    Drop,
    /// Emit them as a block without a geo.
    Implicit,
}

/// Consecutive message lines attributed to one geography
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealBlock {
    pub geo_token: Option<String>,
    pub lines: Vec<String>,
}

struct Pending {
    block: DealBlock,
    header_only: bool,
}

/// Lazy iterator over the blocks of one message
pub struct Blocks<'a> {
    lines: Lines<'a>,
    geo: &'a GeoMatcher,
    leading: LeadingLines,
    current: Option<Pending>,
}

impl<'a> Blocks<'a> {
    pub fn new(text: &'a str, geo: &'a GeoMatcher, leading: LeadingLines) -> Self {
        Self {
            lines: text.lines(),
            geo,
            leading,
            current: None,
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = DealBlock;

    fn next(&mut self) -> Option<DealBlock> {
        for line in self.lines.by_ref() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(marker) = self.geo.marker(line) else {
                self.current
                    .get_or_insert_with(|| Pending {
                        block: DealBlock {
                            geo_token: None,
                            lines: Vec::new(),
                        },
                        header_only: false,
                    })
                    .block
                    .lines
                    .push(line.to_string());
                continue;
            };

            let mut next = Pending {
                header_only: marker.rest.is_none() && line.chars().count() < HEADER_MAX_CHARS,
                block: DealBlock {
                    geo_token: Some(marker.token),
                    lines: marker.rest.into_iter().collect(),
                },
            };

            match self.current.take() {
                None => self.current = Some(next),
                // Geo-only header: fold it into the block that follows.
                Some(previous) if previous.header_only && previous.block.lines.is_empty() => {
                    if let (Some(header), Some(token)) =
                        (previous.block.geo_token, next.block.geo_token.as_mut())
                    {
                        *token = format!("{header}/{token}");
                    }
                    self.current = Some(next);
                }
                Some(previous) => {
                    self.current = Some(next);
                    if previous.block.geo_token.is_some() || self.leading == LeadingLines::Implicit {
                        return Some(previous.block);
                    }
                }
            }
        }

        // Without any marker the whole message is one block with no geo.
        self.current.take().map(|pending| pending.block)
    }
}
