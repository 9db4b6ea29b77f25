// src/classify/mod.rs
//! Classification adapter: one batched classifier call per run.
//!
//! The adapter owns the retry budget and the schema check. Outcomes stay
//! distinct: a verdict with no candidates means "nothing found", while an
//! exhausted budget or malformed answer is an error.

pub mod providers;

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::ingest::Aggregate;
use crate::retry::{with_retry, RetryPolicy};

pub use providers::{build_provider, ClassifierProvider, MockProvider};

/// A message the classifier wants relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRef {
    /// Missing when the classifier only echoed the message id.
    pub source_id: Option<i64>,
    pub message_id: i64,
}

/// A calendar event extracted from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCandidate {
    pub source_id: i64,
    pub message_id: i64,
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub relevant: bool,
    pub relay_candidates: Vec<RelayRef>,
    pub event_candidates: Vec<EventCandidate>,
}

impl Verdict {
    pub fn nothing_found() -> Self {
        Self::default()
    }
}

/// One entry of the serialized batch sent to the classifier.
#[derive(Debug, Serialize)]
struct BatchItem<'a> {
    chat_id: i64,
    chat_title: &'a str,
    message_id: i64,
    timestamp: String,
    text: String,
}

/// Serialize the aggregate as a JSON array, in aggregate order.
pub fn serialize_batch(agg: &Aggregate) -> String {
    let items: Vec<BatchItem<'_>> = agg
        .messages()
        .iter()
        .map(|m| {
            let title = agg
                .batch(m.source_id)
                .map(|b| b.name.as_str())
                .unwrap_or_default();
            BatchItem {
                chat_id: m.source_id,
                chat_title: title,
                message_id: m.id,
                timestamp: m.date.to_rfc3339(),
                text: m.full_text(),
            }
        })
        .collect();
    serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_string())
}

// ------------------------------------------------------------
// Response schema
// ------------------------------------------------------------

/// Ids arrive as numbers or strings depending on the model's mood.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdLike {
    Num(i64),
    Str(String),
}

impl IdLike {
    fn parse(&self, field: &str) -> Result<i64, SyncError> {
        match self {
            IdLike::Num(n) => Ok(*n),
            IdLike::Str(s) => s.trim().parse().map_err(|_| {
                SyncError::ClassificationSchema(format!("{field} is not an integer: {s:?}"))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    relevant: bool,
    results: Vec<RawResult>,
    #[serde(alias = "Events")]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    chat_id: Option<IdLike>,
    message_id: IdLike,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    chat_id: IdLike,
    message_id: IdLike,
    start_datetime: String,
    end_datetime: String,
    title: String,
    description: String,
}

/// Strip a Markdown code fence around a JSON answer.
fn strip_fence(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// ISO-8601 with offset, or naive (taken as UTC).
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(n.and_utc());
        }
    }
    None
}

/// Validate a raw classifier answer into a `Verdict`.
pub fn parse_verdict(raw: &str) -> Result<Verdict, SyncError> {
    let body = strip_fence(raw);
    if body.is_empty() || body.eq_ignore_ascii_case("none") {
        return Ok(Verdict::nothing_found());
    }

    let v: RawVerdict = serde_json::from_str(body)
        .map_err(|e| SyncError::ClassificationSchema(e.to_string()))?;

    let mut relay_candidates = Vec::with_capacity(v.results.len());
    for r in &v.results {
        relay_candidates.push(RelayRef {
            source_id: r.chat_id.as_ref().map(|c| c.parse("chat_id")).transpose()?,
            message_id: r.message_id.parse("message_id")?,
        });
    }

    let mut event_candidates = Vec::with_capacity(v.events.len());
    for e in v.events {
        let start = parse_iso(&e.start_datetime).ok_or_else(|| {
            SyncError::ClassificationSchema(format!("bad start_datetime {:?}", e.start_datetime))
        })?;
        let end = parse_iso(&e.end_datetime).ok_or_else(|| {
            SyncError::ClassificationSchema(format!("bad end_datetime {:?}", e.end_datetime))
        })?;
        event_candidates.push(EventCandidate {
            source_id: e.chat_id.parse("chat_id")?,
            message_id: e.message_id.parse("message_id")?,
            title: e.title.trim().to_string(),
            description: e.description,
            start,
            end: end.max(start),
        });
    }

    Ok(Verdict {
        relevant: v.relevant,
        relay_candidates,
        event_candidates,
    })
}

// ------------------------------------------------------------
// Adapter
// ------------------------------------------------------------

pub struct ClassificationAdapter {
    provider: Arc<dyn ClassifierProvider>,
    policy: RetryPolicy,
}

impl ClassificationAdapter {
    pub fn new(provider: Arc<dyn ClassifierProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// One call over the serialized batch. Every failure kind gets the same
    /// retry; a malformed answer is not retried.
    pub async fn classify(&self, batch: &str) -> Result<Verdict, SyncError> {
        let provider = Arc::clone(&self.provider);
        let raw = with_retry(self.policy, "classify", |_| provider.complete(batch))
            .await
            .map_err(|e| SyncError::TerminalRun {
                step: "classify",
                attempts: e.attempts,
                reason: e.reason(),
            })?;

        let verdict = parse_verdict(&raw)?;
        tracing::info!(
            target: "classify",
            provider = self.provider.name(),
            relevant = verdict.relevant,
            results = verdict.relay_candidates.len(),
            events = verdict.event_candidates.len(),
            "verdict received"
        );
        Ok(verdict)
    }
}
