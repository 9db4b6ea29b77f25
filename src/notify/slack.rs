// src/notify/slack.rs
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use super::{Notification, NotificationKind, Notifier};

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    /// `None` when SLACK_WEBHOOK_URL is unset.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SLACK_WEBHOOK_URL").ok()?;
        Some(Self::new(url))
    }

    pub fn new(webhook_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            webhook_url,
            client,
        }
    }
}

fn slack_text(n: &Notification) -> String {
    let marker = match n.kind {
        NotificationKind::Summary => ":calendar:",
        NotificationKind::Failure => ":warning:",
    };
    format!(
        "{marker} *{}*\n{}\n@ {}",
        n.title,
        n.body,
        n.ts.to_rfc3339()
    )
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, n: &Notification) -> Result<()> {
        let body = serde_json::json!({ "text": slack_text(n) });

        self.client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn failure_text_is_flagged() {
        let ts = chrono::Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let n = Notification::failure("Relay failed", "message 4".into(), ts);
        assert_eq!(
            slack_text(&n),
            ":warning: *Relay failed*\nmessage 4\n@ 2025-06-01T08:00:00+00:00"
        );
    }
}
