// src/store/events.rs
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use super::{from_ts, to_ts, EventRecord, EventRecordStore, SqliteStore};

impl EventRecordStore for SqliteStore {
    fn upsert(&self, record: &EventRecord) -> Result<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO event_records (
                    source_id, message_id, provider_event_id, title,
                    start_time, end_time, description, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(source_id, message_id) DO UPDATE SET
                    provider_event_id = excluded.provider_event_id,
                    title = excluded.title,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    description = excluded.description",
                params![
                    record.source_id,
                    record.message_id,
                    record.provider_event_id,
                    record.title,
                    to_ts(record.start_time),
                    to_ts(record.end_time),
                    record.description,
                    Utc::now().timestamp(),
                ],
            )
        })?;
        tracing::debug!(
            target: "store",
            source_id = record.source_id,
            message_id = record.message_id,
            provider_event_id = ?record.provider_event_id,
            "event record upserted"
        );
        Ok(())
    }

    fn find_near(&self, start: DateTime<Utc>, window: Duration) -> Result<Vec<EventRecord>> {
        let lower = to_ts(start - window);
        let upper = to_ts(start + window);
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT source_id, message_id, provider_event_id, title,
                        start_time, end_time, description
                 FROM event_records
                 WHERE start_time >= ?1 AND start_time <= ?2
                 ORDER BY start_time ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![lower, upper], |r| {
                Ok(EventRecord {
                    source_id: r.get(0)?,
                    message_id: r.get(1)?,
                    provider_event_id: r.get(2)?,
                    title: r.get(3)?,
                    start_time: from_ts(r.get(4)?)?,
                    end_time: from_ts(r.get(5)?)?,
                    description: r.get(6)?,
                })
            })?;
            rows.collect()
        })
    }

    fn provider_event_ids(&self) -> Result<Vec<String>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT DISTINCT provider_event_id FROM event_records
                 WHERE provider_event_id IS NOT NULL ORDER BY provider_event_id",
            )?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect()
        })
    }

    fn clear(&self) -> Result<usize> {
        self.with_conn(|c| c.execute("DELETE FROM event_records", []))
    }
}
