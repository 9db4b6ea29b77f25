// src/ingest/mod.rs
pub mod gateway;
pub mod types;

use crate::error::SyncError;
use crate::ingest::types::{ChatMessage, ChatSource, Source};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::Watermark;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Messages older than this are never (re)processed, even on a cold start.
pub const RECENCY_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_FETCH_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct FetchParams {
    pub policy: RetryPolicy,
    pub limit: usize,
    pub recency: Duration,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::CHAT,
            limit: DEFAULT_FETCH_LIMIT,
            recency: Duration::hours(RECENCY_WINDOW_HOURS),
        }
    }
}

/// Short, stable fingerprint for logging message texts without their content.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Keep messages above the watermark and inside the recency window; newest first.
pub fn filter_new(
    mut messages: Vec<ChatMessage>,
    watermark: Option<&Watermark>,
    not_before: DateTime<Utc>,
) -> Vec<ChatMessage> {
    let min_id = watermark.map(|w| w.last_message_id);
    messages.retain(|m| min_id.map_or(true, |id| m.id > id) && m.date > not_before);
    messages.sort_by(|a, b| b.id.cmp(&a.id));
    messages
}

/// Fetch one source's new messages with the chat retry budget.
pub async fn fetch_new_messages(
    chat: &dyn ChatSource,
    source: &Source,
    watermark: Option<&Watermark>,
    now: DateTime<Utc>,
    params: &FetchParams,
) -> Result<Vec<ChatMessage>, SyncError> {
    let not_before = now - params.recency;
    let min_id = watermark.map(|w| w.last_message_id);
    let raw = with_retry(params.policy, "fetch_messages", |_| {
        chat.fetch_messages(source, min_id, params.limit, not_before)
    })
    .await
    .map_err(|e| SyncError::TerminalSource {
        source_id: source.id,
        attempts: e.attempts,
        reason: e.reason(),
    })?;

    let fetched = raw.len();
    let kept = filter_new(raw, watermark, not_before);
    tracing::debug!(
        target: "ingest",
        source_id = source.id,
        fetched,
        kept = kept.len(),
        "fetched source"
    );
    Ok(kept)
}

/// One source's retained messages, newest first as the platform returns them.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: Source,
    pub name: String,
    pub messages: Vec<ChatMessage>,
}

impl SourceBatch {
    /// Highest message id and timestamp seen in this batch.
    pub fn high_water(&self) -> Option<(i64, DateTime<Utc>)> {
        let id = self.messages.iter().map(|m| m.id).max()?;
        let ts = self.messages.iter().map(|m| m.date).max()?;
        Some((id, ts))
    }
}

/// All sources' messages for one run, oldest first within each source, plus an
/// index back to the originating source.
#[derive(Debug, Default)]
pub struct Aggregate {
    pub batches: Vec<SourceBatch>,
    messages: Vec<ChatMessage>,
    index: HashMap<(i64, i64), usize>,
}

impl Aggregate {
    pub fn build(batches: Vec<SourceBatch>) -> Self {
        let mut messages = Vec::new();
        let mut index = HashMap::new();
        for batch in &batches {
            let mut slice = batch.messages.clone();
            slice.sort_by_key(|m| m.id);
            for mut m in slice {
                m.source_id = batch.source.id;
                index.insert((batch.source.id, m.id), messages.len());
                messages.push(m);
            }
        }
        Self {
            batches,
            messages,
            index,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn batch(&self, source_id: i64) -> Option<&SourceBatch> {
        self.batches.iter().find(|b| b.source.id == source_id)
    }

    /// Map classifier output back to the fetched message. Without a chat id the
    /// message id must be unambiguous across sources.
    pub fn resolve(&self, chat_id: Option<i64>, message_id: i64) -> Option<&ChatMessage> {
        match chat_id {
            Some(cid) => self.index.get(&(cid, message_id)).map(|&i| &self.messages[i]),
            None => {
                let mut hits = self
                    .index
                    .iter()
                    .filter(|((_, mid), _)| *mid == message_id)
                    .map(|(_, &i)| i);
                let first = hits.next()?;
                if hits.next().is_some() {
                    tracing::warn!(message_id, "ambiguous message id without chat id");
                    return None;
                }
                Some(&self.messages[first])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;
    use chrono::TimeZone;

    fn msg(source_id: i64, id: i64, minute: u32) -> ChatMessage {
        ChatMessage {
            id,
            source_id,
            date: Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap(),
            text: format!("m{id}"),
            poll_question: None,
            chat_title: None,
            from_user: false,
        }
    }

    #[test]
    fn filter_drops_seen_and_stale_and_sorts_desc() {
        let wm = Watermark {
            last_message_id: 10,
            last_message_ts: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        };
        let cutoff = Utc.with_ymd_and_hms(2025, 3, 1, 12, 2, 0).unwrap();
        let out = filter_new(
            vec![msg(1, 9, 30), msg(1, 11, 1), msg(1, 12, 5), msg(1, 13, 6)],
            Some(&wm),
            cutoff,
        );
        let ids: Vec<i64> = out.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![13, 12]);
    }

    #[test]
    fn aggregate_orders_oldest_first_per_source_and_resolves() {
        let a = SourceBatch {
            source: Source::new(1, SourceKind::Channel),
            name: "A".into(),
            messages: vec![msg(1, 3, 3), msg(1, 2, 2)],
        };
        let b = SourceBatch {
            source: Source::new(2, SourceKind::Chat),
            name: "B".into(),
            messages: vec![msg(2, 2, 4), msg(2, 1, 1)],
        };
        let agg = Aggregate::build(vec![a, b]);
        let order: Vec<(i64, i64)> = agg.messages().iter().map(|m| (m.source_id, m.id)).collect();
        assert_eq!(order, vec![(1, 2), (1, 3), (2, 1), (2, 2)]);

        assert_eq!(agg.resolve(Some(2), 2).map(|m| m.source_id), Some(2));
        assert_eq!(agg.resolve(None, 3).map(|m| m.source_id), Some(1));
        // id 2 exists in both sources
        assert!(agg.resolve(None, 2).is_none());
        assert!(agg.resolve(Some(3), 1).is_none());
    }

    #[test]
    fn high_water_is_max_not_last() {
        let batch = SourceBatch {
            source: Source::new(1, SourceKind::Channel),
            name: "A".into(),
            messages: vec![msg(1, 12, 12), msg(1, 10, 10), msg(1, 11, 11)],
        };
        let (id, ts) = batch.high_water().unwrap();
        assert_eq!(id, 12);
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 3, 1, 12, 12, 0).unwrap());
    }

    #[test]
    fn anon_hash_is_short_and_stable() {
        assert_eq!(anon_hash("abc").len(), 12);
        assert_eq!(anon_hash("abc"), anon_hash("abc"));
        assert_ne!(anon_hash("abc"), anon_hash("abd"));
    }
}
