//! Removal of in-band control marker spans from assistant text.
//!
//! A span starts at the start token and ends at the nearest following end token (any
//! alias), may cross line breaks, and is removed as a whole. An unterminated start token
//! stays visible until a later fragment closes it. Leading whitespace of the result is
//! dropped; everything else is preserved so markdown structure survives.
//!
//! [`Sanitizer`] rescans a full text. [`StreamSanitizer`] produces the same output while
//! searching for tokens only in the unresolved suffix of a growing stream. Each
//! [`StreamSanitizer::rendered`] call still copies the confirmed prefix.

use std::borrow::Cow;

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::error::{EmptyMarkerSnafu, MarkerPatternSnafu, SanitizerResult};

pub const DEFAULT_START_MARKER: &str = "[start tool call]";
pub const DEFAULT_END_MARKER: &str = "[end tool call]";
pub const DEFAULT_END_ALIAS: &str = "[end tool calls]";

/// Literal tokens delimiting a control span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMarkers {
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_end")]
    pub end: String,
    #[serde(default = "default_end_aliases")]
    pub end_aliases: Vec<String>,
}

impl Default for ControlMarkers {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            end_aliases: default_end_aliases(),
        }
    }
}

impl ControlMarkers {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            end_aliases: Vec::new(),
        }
    }

    pub fn with_end_alias(mut self, alias: impl Into<String>) -> Self {
        self.end_aliases.push(alias.into());
        self
    }

    /// Primary end token first, then aliases; blank aliases are skipped.
    pub fn end_tokens(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.end.as_str()).chain(
            self.end_aliases
                .iter()
                .map(String::as_str)
                .filter(|alias| !alias.is_empty()),
        )
    }

    fn validate(&self) -> SanitizerResult<()> {
        ensure!(
            !self.start.is_empty(),
            EmptyMarkerSnafu {
                stage: "validate-markers",
                marker: "start",
            }
        );
        ensure!(
            !self.end.is_empty(),
            EmptyMarkerSnafu {
                stage: "validate-markers",
                marker: "end",
            }
        );
        Ok(())
    }
}

/// Full-rescan sanitizer backed by a compiled non-greedy pattern.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    pattern: Regex,
}

impl Sanitizer {
    pub fn new(markers: &ControlMarkers) -> SanitizerResult<Self> {
        markers.validate()?;

        let ends = markers
            .end_tokens()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!("(?s){}.*?(?:{})", regex::escape(&markers.start), ends);
        let pattern = Regex::new(&pattern).context(MarkerPatternSnafu {
            stage: "compile-marker-pattern",
        })?;

        Ok(Self { pattern })
    }

    /// Returns `text` with every complete control span removed.
    pub fn sanitize(&self, text: &str) -> String {
        self.strip(text).trim_start().to_string()
    }

    fn strip<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(text, "")
    }
}

/// Incremental sanitizer for one streamed message.
///
/// `clean` holds output that no later fragment can change. `pending` holds either a span
/// opened by a start token (when `inside` is set) or a tail that might grow into a start
/// token. A span whose nearest end token could still be overtaken by a longer or
/// earlier-listed end token stays `tentative` until enough text arrives to decide.
#[derive(Debug, Clone)]
pub struct StreamSanitizer {
    markers: ControlMarkers,
    reference: Sanitizer,
    clean: String,
    pending: String,
    inside: bool,
    tentative: bool,
    // Offset in `pending` before which no end token can begin.
    end_scan_from: usize,
}

impl StreamSanitizer {
    pub fn new(markers: ControlMarkers) -> SanitizerResult<Self> {
        let reference = Sanitizer::new(&markers)?;
        Ok(Self {
            markers,
            reference,
            clean: String::new(),
            pending: String::new(),
            inside: false,
            tentative: false,
            end_scan_from: 0,
        })
    }

    /// Appends one fragment and resolves as much of the pending suffix as possible.
    pub fn push(&mut self, fragment: &str) {
        self.pending.push_str(fragment);

        loop {
            if self.inside {
                if !self.close_span() {
                    break;
                }
            } else if !self.open_span() {
                break;
            }
        }
    }

    /// Sanitized view of everything pushed so far.
    pub fn rendered(&self) -> String {
        let tail = if self.tentative {
            self.reference.strip(&self.pending)
        } else {
            Cow::Borrowed(self.pending.as_str())
        };

        if self.clean.is_empty() {
            return tail.trim_start().to_string();
        }

        let mut rendered = String::with_capacity(self.clean.len() + tail.len());
        rendered.push_str(&self.clean);
        rendered.push_str(&tail);
        rendered
    }

    /// True while a start token has been seen without a settled end token.
    pub fn inside_marker(&self) -> bool {
        self.inside
    }

    fn open_span(&mut self) -> bool {
        let start_len = self.markers.start.len();
        if let Some(index) = self.pending.find(self.markers.start.as_str()) {
            let before = self.pending[..index].to_string();
            self.confirm(&before);
            self.pending.replace_range(..index, "");
            self.inside = true;
            self.end_scan_from = start_len;
            return true;
        }

        let keep = partial_prefix_len(&self.pending, &self.markers.start);
        let split = self.pending.len() - keep;
        let resolved = self.pending[..split].to_string();
        self.confirm(&resolved);
        self.pending.replace_range(..split, "");
        false
    }

    fn close_span(&mut self) -> bool {
        let from = self.end_scan_from;
        let mut nearest: Option<(usize, usize)> = None;
        for (rank, token) in self.markers.end_tokens().enumerate() {
            if let Some(offset) = self.pending[from..].find(token) {
                let position = from + offset;
                if nearest.is_none_or(|(best, _)| position < best) {
                    nearest = Some((position, rank));
                }
            }
        }

        // Any end token that could begin at or after this offset may still be incomplete.
        let longest_end = self.markers.end_tokens().map(str::len).max().unwrap_or(1);
        let mut undecided_from = self
            .pending
            .len()
            .saturating_sub(longest_end.saturating_sub(1))
            .max(self.markers.start.len());
        while !self.pending.is_char_boundary(undecided_from) {
            undecided_from -= 1;
        }

        let Some((position, rank)) = nearest else {
            self.end_scan_from = undecided_from;
            return false;
        };

        if self.could_be_overtaken(position, rank, undecided_from) {
            self.tentative = true;
            self.end_scan_from = undecided_from.min(position);
            return false;
        }

        let length = self
            .markers
            .end_tokens()
            .nth(rank)
            .map(str::len)
            .unwrap_or_default();
        self.pending.replace_range(..position + length, "");
        self.inside = false;
        self.tentative = false;
        self.end_scan_from = 0;
        true
    }

    // True when a not-yet-complete end token could still match at or before `position`
    // and would win over the token found there.
    fn could_be_overtaken(&self, position: usize, rank: usize, undecided_from: usize) -> bool {
        let len = self.pending.len();
        (undecided_from..=position)
            .filter(|&offset| self.pending.is_char_boundary(offset))
            .any(|offset| {
                let partial = &self.pending[offset..];
                self.markers
                    .end_tokens()
                    .enumerate()
                    .filter(|&(other, _)| offset < position || other < rank)
                    .any(|(_, token)| offset + token.len() > len && token.starts_with(partial))
            })
    }

    fn confirm(&mut self, text: &str) {
        if self.clean.is_empty() {
            self.clean.push_str(text.trim_start());
        } else {
            self.clean.push_str(text);
        }
    }
}

/// Length of the longest proper suffix of `text` that is a prefix of `token`.
fn partial_prefix_len(text: &str, token: &str) -> usize {
    let longest = token.len().saturating_sub(1).min(text.len());
    (1..=longest)
        .rev()
        .find(|&length| {
            let split = text.len() - length;
            text.is_char_boundary(split) && token.starts_with(&text[split..])
        })
        .unwrap_or(0)
}

fn default_start() -> String {
    DEFAULT_START_MARKER.to_string()
}

fn default_end() -> String {
    DEFAULT_END_MARKER.to_string()
}

fn default_end_aliases() -> Vec<String> {
    vec![DEFAULT_END_ALIAS.to_string()]
}
