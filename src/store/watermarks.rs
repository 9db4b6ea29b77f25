// src/store/watermarks.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{from_ts, to_ts, SqliteStore, Watermark, WatermarkStore};

impl WatermarkStore for SqliteStore {
    fn get(&self, source_id: i64) -> Result<Option<Watermark>> {
        let row = self.with_conn(|c| {
            c.query_row(
                "SELECT last_message_id, last_message_ts FROM sources
                 WHERE source_id = ?1 AND last_message_id IS NOT NULL",
                params![source_id],
                |r| {
                    let id: i64 = r.get(0)?;
                    let ts: Option<i64> = r.get(1)?;
                    Ok((id, ts))
                },
            )
            .optional()
        })?;

        match row {
            Some((id, ts)) => Ok(Some(Watermark {
                last_message_id: id,
                last_message_ts: from_ts(ts.unwrap_or(0))?,
            })),
            None => Ok(None),
        }
    }

    fn upsert_name(&self, source_id: i64, name: &str) -> Result<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO sources (source_id, name, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(source_id) DO UPDATE SET name = excluded.name
                 WHERE sources.name = ''",
                params![source_id, name, Utc::now().timestamp()],
            )
        })?;
        Ok(())
    }

    fn advance(&self, source_id: i64, message_id: i64, ts: DateTime<Utc>) -> Result<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO sources (source_id, last_message_id, last_message_ts, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(source_id) DO UPDATE SET
                    last_message_id = excluded.last_message_id,
                    last_message_ts = excluded.last_message_ts,
                    updated_at = excluded.updated_at",
                params![source_id, message_id, to_ts(ts), Utc::now().timestamp()],
            )
        })?;
        tracing::debug!(target: "store", source_id, message_id, "watermark advanced");
        Ok(())
    }
}

impl SqliteStore {
    /// Stored display name, if any.
    pub fn source_name(&self, source_id: i64) -> Result<Option<String>> {
        let name = self.with_conn(|c| {
            c.query_row(
                "SELECT name FROM sources WHERE source_id = ?1",
                params![source_id],
                |r| r.get::<_, String>(0),
            )
            .optional()
        })?;
        Ok(name.filter(|n| !n.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn absent_until_advanced() {
        let s = SqliteStore::open_in_memory().unwrap();
        assert!(s.get(7).unwrap().is_none());
        s.upsert_name(7, "Team chat").unwrap();
        // a name alone is not a watermark
        assert!(s.get(7).unwrap().is_none());

        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        s.advance(7, 120, ts).unwrap();
        let wm = s.get(7).unwrap().unwrap();
        assert_eq!(wm.last_message_id, 120);
        assert_eq!(wm.last_message_ts, ts);
    }

    #[test]
    fn name_is_kept_once_set() {
        let s = SqliteStore::open_in_memory().unwrap();
        s.upsert_name(1, "Original").unwrap();
        s.upsert_name(1, "Renamed").unwrap();
        assert_eq!(s.source_name(1).unwrap().as_deref(), Some("Original"));
    }

    #[test]
    fn advance_before_name_then_name_fills_in() {
        let s = SqliteStore::open_in_memory().unwrap();
        s.advance(3, 9, Utc::now()).unwrap();
        assert_eq!(s.source_name(3).unwrap(), None);
        s.upsert_name(3, "Late name").unwrap();
        assert_eq!(s.source_name(3).unwrap().as_deref(), Some("Late name"));
        assert_eq!(s.get(3).unwrap().unwrap().last_message_id, 9);
    }
}
