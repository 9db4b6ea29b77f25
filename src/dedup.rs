// src/dedup.rs
//! Dedup gates.
//!
//! - Relay gate: exact match on letters-only, lower-cased text, within one run.
//! - Event gate: fuzzy title match against persisted events starting within a
//!   time window. The window is applied first; similarity is only computed for
//!   records inside it.
//!
//! Similarity: `strsim::normalized_levenshtein` in [0.0, 1.0]. Substring
//! containment also counts as a match ("Dinner" vs "Dinner with Bob").

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use strsim::normalized_levenshtein;

use crate::store::{EventRecord, EventRecordStore};

pub const EVENT_MATCH_WINDOW_MINUTES: i64 = 120;
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Drop newlines and every non-letter, lower-case the rest.
pub fn normalize_for_relay(text: &str) -> String {
    static RE_NON_LETTER: OnceCell<Regex> = OnceCell::new();
    let re = RE_NON_LETTER.get_or_init(|| Regex::new(r"[^\p{L}]+").unwrap());
    re.replace_all(text, "").to_lowercase()
}

/// Per-run set of relayed texts (normalized).
#[derive(Debug, Default)]
pub struct RelayGate {
    sent: HashSet<String>,
}

impl RelayGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if the text has not been relayed in this run; the text is then
    /// remembered. Texts without letters all normalize to the same key.
    pub fn admit(&mut self, text: &str) -> bool {
        self.sent.insert(normalize_for_relay(text))
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

pub fn title_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&fold_title(a), &fold_title(b))
}

/// Same event title: similar enough, or one contains the other.
pub fn titles_match(a: &str, b: &str) -> bool {
    let (fa, fb) = (fold_title(a), fold_title(b));
    if fa.is_empty() || fb.is_empty() {
        return false;
    }
    normalized_levenshtein(&fa, &fb) > TITLE_SIMILARITY_THRESHOLD
        || fa.contains(&fb)
        || fb.contains(&fa)
}

fn fold_title(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Outcome of the event gate for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDecision {
    /// A persisted event already covers this one.
    Duplicate { existing: EventRecord, similarity: f64 },
    New,
}

/// Event gate bound to a lookup window around the candidate start.
#[derive(Debug, Clone, Copy)]
pub struct EventGate {
    window: Duration,
}

impl Default for EventGate {
    fn default() -> Self {
        Self::new(Duration::minutes(EVENT_MATCH_WINDOW_MINUTES))
    }
}

impl EventGate {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(
        &self,
        store: &dyn EventRecordStore,
        title: &str,
        start: DateTime<Utc>,
    ) -> Result<EventDecision> {
        let candidates = store.find_near(start, self.window)?;
        for existing in candidates {
            if titles_match(title, &existing.title) {
                let similarity = title_similarity(title, &existing.title);
                tracing::info!(
                    target: "dedup",
                    candidate = title,
                    existing = %existing.title,
                    similarity = %format!("{similarity:.2}"),
                    "duplicate event detected"
                );
                return Ok(EventDecision::Duplicate {
                    existing,
                    similarity,
                });
            }
        }
        Ok(EventDecision::New)
    }
}
