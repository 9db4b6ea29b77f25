// tests/common/mod.rs
// In-process fakes for the chat bridge and the calendar.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use dialog_scout::calendar::{Calendar, NewCalendarEvent};
use dialog_scout::classify::{ClassificationAdapter, MockProvider};
use dialog_scout::engine::{Orchestrator, RunSettings};
use dialog_scout::ingest::types::{ChatMessage, ChatSource, RelayOptions, Source, SourceKind};
use dialog_scout::notify::{ChatNotifier, NotifierMux};
use dialog_scout::retry::RetryPolicy;
use dialog_scout::store::SqliteStore;

pub const OUTPUT: i64 = -500;
pub const ERRORS: i64 = -900;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn channel(id: i64, title: &str) -> Source {
    let mut s = Source::new(id, SourceKind::Channel);
    s.title = Some(title.to_string());
    s
}

pub fn msg(source_id: i64, id: i64, minutes_ago: i64, text: &str) -> ChatMessage {
    ChatMessage {
        id,
        source_id,
        date: now() - Duration::minutes(minutes_ago),
        text: text.to_string(),
        poll_question: None,
        chat_title: None,
        from_user: false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Forward {
        source_id: i64,
        message_id: i64,
        destination: i64,
        schedule_at: Option<DateTime<Utc>>,
    },
    Link {
        text: String,
        destination: i64,
    },
    Text {
        text: String,
        destination: i64,
    },
}

#[derive(Default)]
pub struct FakeChat {
    pub sources: Mutex<Vec<Source>>,
    pub messages: Mutex<HashMap<i64, Vec<ChatMessage>>>,
    /// Sources whose fetch always fails.
    pub broken_sources: Mutex<HashSet<i64>>,
    /// Remaining `list_sources` failures before it succeeds.
    pub list_failures: AtomicU32,
    pub fetch_calls: AtomicU32,
    pub fail_relays: Mutex<bool>,
    pub sent: Mutex<Vec<Sent>>,
}

impl FakeChat {
    pub fn with_source(self, source: Source, messages: Vec<ChatMessage>) -> Self {
        self.messages.lock().insert(source.id, messages);
        self.sources.lock().push(source);
        self
    }

    pub fn forwards(&self) -> Vec<(i64, i64)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Forward {
                    source_id,
                    message_id,
                    ..
                } => Some((*source_id, *message_id)),
                _ => None,
            })
            .collect()
    }

    pub fn texts_to(&self, destination: i64) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Text {
                    text,
                    destination: d,
                } if *d == destination => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatSource for FakeChat {
    async fn list_sources(&self, _filter: &str) -> Result<Vec<Source>> {
        if self
            .list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("dialog filters unavailable"));
        }
        Ok(self.sources.lock().clone())
    }

    async fn fetch_messages(
        &self,
        source: &Source,
        min_id: Option<i64>,
        limit: usize,
        _not_before: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_sources.lock().contains(&source.id) {
            return Err(anyhow!("FLOOD_WAIT"));
        }
        // like the platform: min_id filter and limit, but no recency filter
        let mut out: Vec<ChatMessage> = self
            .messages
            .lock()
            .get(&source.id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| min_id.map_or(true, |id| m.id > id))
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(limit);
        Ok(out)
    }

    async fn relay(
        &self,
        message: &ChatMessage,
        destination: i64,
        opts: &RelayOptions,
    ) -> Result<()> {
        if *self.fail_relays.lock() {
            return Err(anyhow!("CHAT_FORWARDS_RESTRICTED"));
        }
        self.sent.lock().push(Sent::Forward {
            source_id: message.source_id,
            message_id: message.id,
            destination,
            schedule_at: opts.schedule_at,
        });
        Ok(())
    }

    async fn send_link(&self, text: &str, destination: i64, _opts: &RelayOptions) -> Result<()> {
        self.sent.lock().push(Sent::Link {
            text: text.to_string(),
            destination,
        });
        Ok(())
    }

    async fn send_text(&self, text: &str, destination: i64) -> Result<()> {
        self.sent.lock().push(Sent::Text {
            text: text.to_string(),
            destination,
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
pub struct FakeCalendar {
    pub created: Mutex<Vec<NewCalendarEvent>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_titles: Mutex<HashSet<String>>,
}

#[async_trait]
impl Calendar for FakeCalendar {
    async fn create_event(&self, event: &NewCalendarEvent) -> Result<String> {
        if self.fail_titles.lock().contains(&event.title) {
            return Err(anyhow!("calendar returned 503"));
        }
        let mut created = self.created.lock();
        created.push(event.clone());
        Ok(format!("gcal-{}", created.len()))
    }

    async fn delete_event(&self, provider_event_id: &str) -> Result<()> {
        self.deleted.lock().push(provider_event_id.to_string());
        Ok(())
    }

    fn subscription_link(&self) -> Option<String> {
        Some("https://calendar.google.com/calendar/u/0/r?cid=test".to_string())
    }
}

pub struct Harness {
    pub chat: Arc<FakeChat>,
    pub calendar: Arc<FakeCalendar>,
    pub store: Arc<SqliteStore>,
    pub provider: Arc<MockProvider>,
}

impl Harness {
    pub fn new(chat: FakeChat) -> Self {
        Self {
            chat: Arc::new(chat),
            calendar: Arc::new(FakeCalendar::default()),
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            provider: Arc::new(MockProvider::fixed("None")),
        }
    }

    pub fn settings() -> RunSettings {
        RunSettings {
            source_filter: "Scout".into(),
            output_dialog_id: OUTPUT,
            ..RunSettings::default()
        }
    }

    pub fn orchestrator(&self, settings: RunSettings) -> Orchestrator {
        self.orchestrator_with_retry(settings, RetryPolicy::CLASSIFY)
    }

    pub fn orchestrator_with_retry(
        &self,
        settings: RunSettings,
        classify: RetryPolicy,
    ) -> Orchestrator {
        let notifier =
            NotifierMux::new().with(Box::new(ChatNotifier::new(self.chat.clone(), OUTPUT, ERRORS)));
        Orchestrator::new(
            self.chat.clone(),
            ClassificationAdapter::new(self.provider.clone(), classify),
            self.calendar.clone(),
            self.store.clone(),
            self.store.clone(),
            notifier,
            settings,
        )
    }
}
