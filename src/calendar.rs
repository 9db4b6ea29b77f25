// src/calendar.rs
//! Calendar collaborator. Dedup is local, so the core only needs `create_event`;
//! `delete_event` serves the purge tool.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCalendarEvent {
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[async_trait]
pub trait Calendar: Send + Sync {
    /// Create the event; returns the provider's event id.
    async fn create_event(&self, event: &NewCalendarEvent) -> Result<String>;
    async fn delete_event(&self, provider_event_id: &str) -> Result<()>;
    /// Public subscription link for the summary, if the calendar has one.
    fn subscription_link(&self) -> Option<String>;
}

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google Calendar v3 over REST with a pre-issued OAuth access token.
pub struct GoogleCalendar {
    calendar_id: String,
    access_token: String,
    client: Client,
}

#[derive(Serialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: String,
}

#[derive(Serialize)]
struct InsertBody<'a> {
    summary: &'a str,
    description: &'a str,
    start: EventTime,
    end: EventTime,
}

#[derive(Deserialize)]
struct InsertResp {
    id: String,
}

impl GoogleCalendar {
    pub fn new(calendar_id: String, access_token: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent("dialog-scout/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building calendar client")?;
        Ok(Self {
            calendar_id,
            access_token,
            client,
        })
    }

    fn events_url(&self) -> String {
        format!(
            "{API_BASE}/calendars/{}/events",
            urlencoding::encode(&self.calendar_id)
        )
    }

    fn event_url(&self, provider_event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(),
            urlencoding::encode(provider_event_id)
        )
    }
}

#[async_trait]
impl Calendar for GoogleCalendar {
    async fn create_event(&self, event: &NewCalendarEvent) -> Result<String> {
        let body = InsertBody {
            summary: &event.title,
            description: &event.description,
            start: EventTime {
                date_time: event.start.to_rfc3339(),
            },
            end: EventTime {
                date_time: event.end.to_rfc3339(),
            },
        };
        let resp: InsertResp = self
            .client
            .post(self.events_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .context("calendar insert")?
            .error_for_status()
            .context("calendar insert non-2xx")?
            .json()
            .await
            .context("calendar insert body")?;
        if resp.id.is_empty() {
            return Err(anyhow!("calendar returned an empty event id"));
        }
        Ok(resp.id)
    }

    async fn delete_event(&self, provider_event_id: &str) -> Result<()> {
        let url = self.event_url(provider_event_id);
        let resp = self
            .client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("calendar delete")?;
        // already gone is fine
        if resp.status() == reqwest::StatusCode::GONE
            || resp.status() == reqwest::StatusCode::NOT_FOUND
        {
            return Ok(());
        }
        resp.error_for_status().context("calendar delete non-2xx")?;
        Ok(())
    }

    fn subscription_link(&self) -> Option<String> {
        Some(format!(
            "https://calendar.google.com/calendar/u/0/r?cid={}",
            self.calendar_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_id_is_path_encoded() {
        let c = GoogleCalendar::new("team@group.calendar.google.com".into(), "t".into()).unwrap();
        assert_eq!(
            c.events_url(),
            "https://www.googleapis.com/calendar/v3/calendars/team%40group.calendar.google.com/events"
        );
        assert_eq!(
            c.subscription_link().as_deref(),
            Some("https://calendar.google.com/calendar/u/0/r?cid=team@group.calendar.google.com")
        );
    }

    #[test]
    fn reserved_characters_in_ids_are_escaped() {
        let c = GoogleCalendar::new("a#b@c d".into(), "t".into()).unwrap();
        assert_eq!(
            c.events_url(),
            "https://www.googleapis.com/calendar/v3/calendars/a%23b%40c%20d/events"
        );
        assert_eq!(c.event_url("x/y#1"), format!("{}/x%2Fy%231", c.events_url()));
    }
}
