// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Peer kind of a source. Only affects link formatting, never processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    User,
    #[serde(alias = "group")]
    Chat,
    #[serde(alias = "broadcast")]
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub kind: SourceKind,
    #[serde(default)]
    pub title: Option<String>,
    /// Public handle, when the peer has one.
    #[serde(default)]
    pub username: Option<String>,
}

impl Source {
    pub fn new(id: i64, kind: SourceKind) -> Self {
        Self {
            id,
            kind,
            title: None,
            username: None,
        }
    }

    pub fn has_public_link(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Link to a message of this source, if the peer kind has one.
    pub fn message_link(&self, message_id: i64) -> Option<String> {
        match (self.kind, self.username.as_deref()) {
            (_, Some(u)) if !u.is_empty() => Some(format!("https://t.me/{u}/{message_id}")),
            (SourceKind::Chat | SourceKind::Channel, _) => {
                Some(format!("https://t.me/c/{}/{message_id}", self.id))
            }
            (SourceKind::User, _) => None,
        }
    }

    pub fn display_name(&self) -> String {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => match self.kind {
                SourceKind::User => format!("user {}", self.id),
                SourceKind::Chat => format!("chat {}", self.id),
                SourceKind::Channel => format!("channel {}", self.id),
            },
        }
    }
}

/// A fetched message. Transient: only watermarks and event records are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    #[serde(default)]
    pub source_id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub poll_question: Option<String>,
    /// Title of the chat the message was posted in.
    #[serde(default)]
    pub chat_title: Option<String>,
    /// Authored by a user account (as opposed to a channel signature).
    #[serde(default)]
    pub from_user: bool,
}

impl ChatMessage {
    /// Message text plus the poll question, if any.
    pub fn full_text(&self) -> String {
        match self.poll_question.as_deref() {
            Some(q) if !q.trim().is_empty() => {
                if self.text.is_empty() {
                    q.to_string()
                } else {
                    format!("{}\n{}", self.text, q)
                }
            }
            _ => self.text.clone(),
        }
    }
}

/// Delivery options for relays; `schedule_at` comes from the run's stagger counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayOptions {
    pub schedule_at: Option<DateTime<Utc>>,
    pub link_preview: bool,
}

/// Chat platform collaborator. Session and wire protocol live behind this trait.
#[async_trait::async_trait]
pub trait ChatSource: Send + Sync {
    /// Resolve a named source filter (folder) into sources.
    async fn list_sources(&self, filter: &str) -> Result<Vec<Source>>;

    /// Messages with `id > min_id` (all when `None`) and `date > not_before`, newest first.
    async fn fetch_messages(
        &self,
        source: &Source,
        min_id: Option<i64>,
        limit: usize,
        not_before: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>>;

    /// Forward the message itself to `destination`.
    async fn relay(&self, message: &ChatMessage, destination: i64, opts: &RelayOptions)
        -> Result<()>;

    /// Post a link (or any short text meant to unfurl) to `destination`.
    async fn send_link(&self, text: &str, destination: i64, opts: &RelayOptions) -> Result<()>;

    /// Plain notification text, used by the reporting sink.
    async fn send_text(&self, text: &str, destination: i64) -> Result<()>;

    fn name(&self) -> &'static str;
}
