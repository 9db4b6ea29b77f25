// src/store/mod.rs
//! Durable state: per-source watermarks and records of created calendar events.
//!
//! Both live in one SQLite file. The two stores are independent (no shared
//! transaction), so a crash between creating an event and advancing a
//! watermark leaves a record whose message is fetched again next run; the
//! natural-key upsert makes that replay harmless.

pub mod events;
pub mod watermarks;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

/// Highest message already processed for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub last_message_id: i64,
    pub last_message_ts: DateTime<Utc>,
}

/// A calendar event we created (or associated with an existing one) for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub source_id: i64,
    pub message_id: i64,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: String,
    /// `None` when no provider event could be associated.
    pub provider_event_id: Option<String>,
}

pub trait WatermarkStore: Send + Sync {
    fn get(&self, source_id: i64) -> Result<Option<Watermark>>;
    /// Remember the display name; no-op when one is already stored.
    fn upsert_name(&self, source_id: i64, name: &str) -> Result<()>;
    /// Unconditional overwrite. Callers pass the batch maximum.
    fn advance(&self, source_id: i64, message_id: i64, ts: DateTime<Utc>) -> Result<()>;
}

pub trait EventRecordStore: Send + Sync {
    /// Insert or replace by `(source_id, message_id)`.
    fn upsert(&self, record: &EventRecord) -> Result<()>;
    /// Records whose start lies in `[start - window, start + window]`.
    fn find_near(&self, start: DateTime<Utc>, window: Duration) -> Result<Vec<EventRecord>>;
    /// Distinct provider ids we hold, for maintenance.
    fn provider_event_ids(&self) -> Result<Vec<String>>;
    /// Drop every record. Returns how many were removed.
    fn clear(&self) -> Result<usize>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sources (
    source_id        INTEGER PRIMARY KEY,
    name             TEXT NOT NULL DEFAULT '',
    last_message_id  INTEGER,
    last_message_ts  INTEGER,
    updated_at       INTEGER
);
CREATE TABLE IF NOT EXISTS event_records (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id         INTEGER NOT NULL,
    message_id        INTEGER NOT NULL,
    provider_event_id TEXT,
    title             TEXT NOT NULL,
    start_time        INTEGER NOT NULL,
    end_time          INTEGER NOT NULL,
    description       TEXT NOT NULL DEFAULT '',
    created_at        INTEGER NOT NULL,
    UNIQUE(source_id, message_id)
);
CREATE INDEX IF NOT EXISTS idx_event_records_start ON event_records(start_time);
";

/// SQLite-backed implementation of both stores.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite store {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory sqlite")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("creating schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        Ok(f(&conn)?)
    }
}

pub(crate) fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_ts(secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {secs}").into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("scout.db");
        {
            let s = SqliteStore::open(&path).unwrap();
            s.upsert_name(1, "first").unwrap();
        }
        let s = SqliteStore::open(&path).unwrap();
        s.advance(1, 5, Utc::now()).unwrap();
        assert_eq!(s.get(1).unwrap().map(|w| w.last_message_id), Some(5));
    }
}
