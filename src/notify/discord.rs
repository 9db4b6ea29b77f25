// src/notify/discord.rs
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Notification, NotificationKind, Notifier};

const COLOR_SUMMARY: u32 = 0x2e_cc_71;
const COLOR_FAILURE: u32 = 0xe7_4c_3c;

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    /// `None` when DISCORD_WEBHOOK_URL is unset.
    pub fn from_env() -> Option<Self> {
        std::env::var("DISCORD_WEBHOOK_URL").ok().map(Self::new)
    }

    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post_with_backoff(&self, payload: &DiscordWebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("Discord webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("Discord webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, n: &Notification) -> Result<()> {
        let payload = DiscordWebhookPayload::from_notification(n);
        self.post_with_backoff(&payload).await
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn from_notification(n: &Notification) -> Self {
        let color = match n.kind {
            NotificationKind::Summary => COLOR_SUMMARY,
            NotificationKind::Failure => COLOR_FAILURE,
        };
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: n.title.clone(),
                description: n.body.clone(),
                color,
                timestamp: n.ts.to_rfc3339(),
            }],
        }
    }
}
