//! Maintenance tool: delete every calendar event this scout created, then
//! clear the local event records. Manual use only.

use std::process::ExitCode;

use anyhow::Result;

use dialog_scout::calendar::{Calendar, GoogleCalendar};
use dialog_scout::config::AppConfig;
use dialog_scout::init_tracing;
use dialog_scout::store::{EventRecordStore, SqliteStore};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    match purge().await {
        Ok((deleted, failed)) => {
            println!("purge-calendar done: {deleted} deleted, {failed} failed");
            if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("purge-calendar failed: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn purge() -> Result<(usize, usize)> {
    let cfg = AppConfig::load_default()?;
    let store = SqliteStore::open(&cfg.state_path)?;
    let calendar = GoogleCalendar::new(cfg.calendar.calendar_id, cfg.calendar.access_token)?;
    purge_with(&calendar, &store).await
}

/// Records are only cleared when every provider delete succeeded, so a rerun
/// can pick up the leftovers.
async fn purge_with(
    calendar: &dyn Calendar,
    store: &dyn EventRecordStore,
) -> Result<(usize, usize)> {
    let ids = store.provider_event_ids()?;
    let (mut deleted, mut failed) = (0, 0);
    for id in &ids {
        match calendar.delete_event(id).await {
            Ok(()) => {
                deleted += 1;
                tracing::info!(provider_event_id = %id, "deleted event");
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(provider_event_id = %id, error = %format!("{e:#}"), "delete failed");
            }
        }
    }
    if failed == 0 {
        let cleared = store.clear()?;
        tracing::info!(cleared, "local event records cleared");
    }
    Ok((deleted, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dialog_scout::calendar::NewCalendarEvent;
    use dialog_scout::store::EventRecord;
    use std::sync::Mutex;

    struct Recording {
        deleted: Mutex<Vec<String>>,
        refuse: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl Calendar for Recording {
        async fn create_event(&self, _event: &NewCalendarEvent) -> Result<String> {
            anyhow::bail!("not used")
        }
        async fn delete_event(&self, id: &str) -> Result<()> {
            if self.refuse == Some(id) {
                anyhow::bail!("403");
            }
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
        fn subscription_link(&self) -> Option<String> {
            None
        }
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        for (mid, pid) in [(1, Some("a")), (2, Some("a")), (3, Some("b")), (4, None)] {
            store
                .upsert(&EventRecord {
                    source_id: 9,
                    message_id: mid,
                    title: format!("e{mid}"),
                    start_time: t,
                    end_time: t,
                    description: String::new(),
                    provider_event_id: pid.map(str::to_string),
                })
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn deletes_each_provider_event_once_then_clears() {
        let store = seeded();
        let cal = Recording {
            deleted: Mutex::new(Vec::new()),
            refuse: None,
        };
        assert_eq!(purge_with(&cal, &store).await.unwrap(), (2, 0));
        assert_eq!(*cal.deleted.lock().unwrap(), vec!["a", "b"]);
        assert!(store.provider_event_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn keeps_records_when_a_delete_fails() {
        let store = seeded();
        let cal = Recording {
            deleted: Mutex::new(Vec::new()),
            refuse: Some("b"),
        };
        assert_eq!(purge_with(&cal, &store).await.unwrap(), (1, 1));
        assert_eq!(store.provider_event_ids().unwrap(), vec!["a", "b"]);
    }
}
