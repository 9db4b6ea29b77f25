// src/notify/mod.rs
//! Reporting sinks. Every run sends one summary plus one notification per
//! unrecoverable failure. Sinks never fail the run: the mux logs and drops
//! their errors.

pub mod chat;
pub mod discord;
pub mod email;
pub mod slack;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub use chat::ChatNotifier;
pub use discord::DiscordNotifier;
pub use email::EmailSender;
pub use slack::SlackNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Summary,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub ts: DateTime<Utc>,
}

impl Notification {
    pub fn summary(body: String, ts: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::Summary,
            title: "Scout run summary".to_string(),
            body,
            ts,
        }
    }

    pub fn failure(title: impl Into<String>, body: String, ts: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::Failure,
            title: title.into(),
            body,
            ts,
        }
    }

    /// Title and body as one plain-text message.
    pub fn plain_text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, n: &Notification) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fan-out to every configured sink.
#[derive(Default)]
pub struct NotifierMux {
    sinks: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Webhook and SMTP sinks whose env vars are present.
    pub fn from_env() -> Self {
        let mut mux = Self::new();
        if let Some(s) = SlackNotifier::from_env() {
            mux.push(Box::new(s));
        }
        if let Some(d) = DiscordNotifier::from_env() {
            mux.push(Box::new(d));
        }
        match EmailSender::from_env() {
            Ok(Some(e)) => mux.push(Box::new(e)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "email sink disabled"),
        }
        mux
    }

    pub fn push(&mut self, sink: Box<dyn Notifier>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Box<dyn Notifier>) -> Self {
        self.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn notify(&self, n: &Notification) {
        if self.sinks.is_empty() {
            tracing::info!(target: "notify", kind = ?n.kind, title = %n.title, "no sinks configured");
            return;
        }
        for sink in &self.sinks {
            if let Err(e) = sink.send(n).await {
                tracing::warn!(
                    target: "notify",
                    sink = sink.name(),
                    kind = ?n.kind,
                    error = %format!("{e:#}"),
                    "notification failed"
                );
            }
        }
    }
}
