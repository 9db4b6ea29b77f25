// src/ingest/gateway.rs
//! `ChatSource` over a JSON/HTTP chat bridge.
//!
//! The bridge owns the platform session. Routes:
//! `GET /sources`, `GET /sources/{id}/messages`, `POST /messages/forward`,
//! `POST /messages/send`. All requests carry the bearer token.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

use super::types::{ChatMessage, ChatSource, RelayOptions, Source};

pub struct HttpChatGateway {
    base_url: String,
    token: String,
    client: Client,
}

#[derive(Serialize)]
struct ForwardReq {
    source_id: i64,
    message_id: i64,
    destination: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SendReq<'a> {
    destination: i64,
    text: &'a str,
    link_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_at: Option<DateTime<Utc>>,
}

impl HttpChatGateway {
    pub fn new(base_url: &str, token: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent("dialog-scout/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .context("building chat gateway client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?
            .error_for_status()
            .with_context(|| format!("POST {path} non-2xx"))?;
        Ok(())
    }
}

#[async_trait]
impl ChatSource for HttpChatGateway {
    async fn list_sources(&self, filter: &str) -> Result<Vec<Source>> {
        let sources: Vec<Source> = self
            .client
            .get(self.url("/sources"))
            .bearer_auth(&self.token)
            .query(&[("filter", filter)])
            .send()
            .await
            .context("GET /sources")?
            .error_for_status()
            .context("GET /sources non-2xx")?
            .json()
            .await
            .context("decoding sources")?;
        Ok(sources)
    }

    async fn fetch_messages(
        &self,
        source: &Source,
        min_id: Option<i64>,
        limit: usize,
        not_before: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>> {
        let path = format!("/sources/{}/messages", source.id);
        let mut query = vec![
            ("limit", limit.to_string()),
            ("not_before", not_before.to_rfc3339()),
        ];
        if let Some(id) = min_id {
            query.push(("min_id", id.to_string()));
        }
        let mut messages: Vec<ChatMessage> = self
            .client
            .get(self.url(&path))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?
            .error_for_status()
            .with_context(|| format!("GET {path} non-2xx"))?
            .json()
            .await
            .context("decoding messages")?;
        // the bridge may omit source ids on messages
        for m in &mut messages {
            m.source_id = source.id;
        }
        Ok(messages)
    }

    async fn relay(
        &self,
        message: &ChatMessage,
        destination: i64,
        opts: &RelayOptions,
    ) -> Result<()> {
        let req = ForwardReq {
            source_id: message.source_id,
            message_id: message.id,
            destination,
            schedule_at: opts.schedule_at,
        };
        self.post_json("/messages/forward", &req).await
    }

    async fn send_link(&self, text: &str, destination: i64, opts: &RelayOptions) -> Result<()> {
        let req = SendReq {
            destination,
            text,
            link_preview: opts.link_preview,
            schedule_at: opts.schedule_at,
        };
        self.post_json("/messages/send", &req).await
    }

    async fn send_text(&self, text: &str, destination: i64) -> Result<()> {
        let req = SendReq {
            destination,
            text,
            link_preview: false,
            schedule_at: None,
        };
        self.post_json("/messages/send", &req).await
    }

    fn name(&self) -> &'static str {
        "http-gateway"
    }
}
