// src/dispatch.rs
//! Dispatch step: act on a verdict's relay and event candidates.
//!
//! Candidates are handled one by one in verdict order. Each one is guarded on
//! its own; a failure is recorded in the report and the loop moves on. Side
//! effects (relay, calendar create) are attempted once, never retried, so a
//! flaky collaborator cannot produce duplicates.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;

use crate::calendar::{Calendar, NewCalendarEvent};
use crate::classify::{EventCandidate, RelayRef, Verdict};
use crate::dedup::{EventDecision, EventGate, RelayGate};
use crate::ingest::types::{ChatMessage, ChatSource, RelayOptions, Source};
use crate::ingest::{anon_hash, Aggregate};
use crate::metrics as m;
use crate::store::{EventRecord, EventRecordStore};

/// Per-run dispatch state: the sent-relay set and the relay stagger counter.
pub struct DispatchContext {
    run_started: DateTime<Utc>,
    stagger: Duration,
    relays_scheduled: i32,
    relay_gate: RelayGate,
    event_gate: EventGate,
    output_dialog_id: i64,
}

impl DispatchContext {
    pub fn new(
        run_started: DateTime<Utc>,
        stagger: Duration,
        event_gate: EventGate,
        output_dialog_id: i64,
    ) -> Self {
        Self {
            run_started,
            stagger,
            relays_scheduled: 0,
            relay_gate: RelayGate::new(),
            event_gate,
            output_dialog_id,
        }
    }

    /// Delivery options for the next relay. With a stagger, the n-th relay
    /// (1-based) is scheduled at `run_started + n * stagger`.
    pub fn next_relay_options(&mut self) -> RelayOptions {
        if self.stagger <= Duration::zero() {
            return RelayOptions {
                schedule_at: None,
                link_preview: true,
            };
        }
        self.relays_scheduled += 1;
        RelayOptions {
            schedule_at: Some(self.run_started + self.stagger * self.relays_scheduled),
            link_preview: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Sent { linked: bool, forwarded: bool },
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Created { provider_event_id: String },
    Associated { provider_event_id: Option<String> },
}

/// A candidate whose side effect failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    pub kind: CandidateKind,
    pub source_id: Option<i64>,
    pub message_id: i64,
    pub source_name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Relay,
    Event,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub relayed: usize,
    pub relay_duplicates: usize,
    pub events_created: usize,
    pub event_duplicates: usize,
    pub failures: Vec<CandidateFailure>,
}

/// Relay one message: a user-authored message with a link gets the link;
/// the message itself is forwarded when no link went out or the source has
/// no public link.
pub async fn relay_message(
    chat: &dyn ChatSource,
    source: &Source,
    message: &ChatMessage,
    destination: i64,
    opts: &RelayOptions,
) -> Result<RelayOutcome> {
    let mut linked = false;
    if message.from_user {
        if let Some(link) = source.message_link(message.id) {
            chat.send_link(&link, destination, opts).await?;
            linked = true;
        }
    }
    let mut forwarded = false;
    if !linked || !source.has_public_link() {
        chat.relay(message, destination, opts).await?;
        forwarded = true;
    }
    Ok(RelayOutcome::Sent { linked, forwarded })
}

pub struct Dispatcher<'a> {
    pub chat: &'a dyn ChatSource,
    pub calendar: &'a dyn Calendar,
    pub events: &'a dyn EventRecordStore,
}

impl<'a> Dispatcher<'a> {
    pub async fn dispatch(
        &self,
        ctx: &mut DispatchContext,
        agg: &Aggregate,
        verdict: &Verdict,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for r in &verdict.relay_candidates {
            match self.relay_candidate(ctx, agg, r).await {
                Ok(RelayOutcome::Sent { .. }) => {
                    report.relayed += 1;
                    counter!(m::RELAY_SENT).increment(1);
                }
                Ok(RelayOutcome::Duplicate) => {
                    report.relay_duplicates += 1;
                    counter!(m::RELAY_DUPLICATES).increment(1);
                }
                Err(e) => {
                    counter!(m::CANDIDATE_FAILURES).increment(1);
                    report.failures.push(CandidateFailure {
                        kind: CandidateKind::Relay,
                        source_id: r.source_id,
                        message_id: r.message_id,
                        source_name: source_name(agg, r.source_id, r.message_id),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        for ev in &verdict.event_candidates {
            match self.event_candidate(ctx, agg, ev).await {
                Ok(EventOutcome::Created { .. }) => {
                    report.events_created += 1;
                    counter!(m::EVENTS_CREATED).increment(1);
                }
                Ok(EventOutcome::Associated { .. }) => {
                    report.event_duplicates += 1;
                    counter!(m::EVENT_DUPLICATES).increment(1);
                }
                Err(e) => {
                    counter!(m::CANDIDATE_FAILURES).increment(1);
                    report.failures.push(CandidateFailure {
                        kind: CandidateKind::Event,
                        source_id: Some(ev.source_id),
                        message_id: ev.message_id,
                        source_name: source_name(agg, Some(ev.source_id), ev.message_id),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        report
    }

    async fn relay_candidate(
        &self,
        ctx: &mut DispatchContext,
        agg: &Aggregate,
        r: &RelayRef,
    ) -> Result<RelayOutcome> {
        let message = agg
            .resolve(r.source_id, r.message_id)
            .or_else(|| r.source_id.and_then(|_| agg.resolve(None, r.message_id)))
            .ok_or_else(|| anyhow!("message {} is not part of this run", r.message_id))?;
        let batch = agg
            .batch(message.source_id)
            .ok_or_else(|| anyhow!("no batch for source {}", message.source_id))?;

        let text = message.full_text();
        if !ctx.relay_gate.admit(&text) {
            tracing::debug!(
                target: "dispatch",
                source_id = message.source_id,
                message_id = message.id,
                text_hash = %anon_hash(&text),
                "relay duplicate skipped"
            );
            return Ok(RelayOutcome::Duplicate);
        }

        let opts = ctx.next_relay_options();
        let outcome =
            relay_message(self.chat, &batch.source, message, ctx.output_dialog_id, &opts).await?;
        tracing::info!(
            target: "dispatch",
            source_id = message.source_id,
            message_id = message.id,
            outcome = ?outcome,
            "message relayed"
        );
        Ok(outcome)
    }

    async fn event_candidate(
        &self,
        ctx: &DispatchContext,
        agg: &Aggregate,
        ev: &EventCandidate,
    ) -> Result<EventOutcome> {
        // the classifier sometimes echoes a wrong chat id; fall back to the id alone
        let message = agg
            .resolve(Some(ev.source_id), ev.message_id)
            .or_else(|| agg.resolve(None, ev.message_id))
            .ok_or_else(|| anyhow!("message {} is not part of this run", ev.message_id))?;
        let link = agg
            .batch(message.source_id)
            .and_then(|b| b.source.message_link(message.id));

        let mut record = EventRecord {
            source_id: message.source_id,
            message_id: message.id,
            title: ev.title.clone(),
            start_time: ev.start,
            end_time: ev.end,
            description: ev.description.clone(),
            provider_event_id: None,
        };

        match ctx.event_gate.check(self.events, &ev.title, ev.start)? {
            EventDecision::Duplicate { existing, .. } => {
                record.provider_event_id = existing.provider_event_id;
                self.events.upsert(&record)?;
                Ok(EventOutcome::Associated {
                    provider_event_id: record.provider_event_id,
                })
            }
            EventDecision::New => {
                let description = match &link {
                    Some(l) => format!("{}\n\n{}", ev.description, l),
                    None => ev.description.clone(),
                };
                let provider_event_id = self
                    .calendar
                    .create_event(&NewCalendarEvent {
                        title: ev.title.clone(),
                        description,
                        start: ev.start,
                        end: ev.end,
                    })
                    .await?;
                record.provider_event_id = Some(provider_event_id.clone());
                self.events.upsert(&record)?;
                tracing::info!(
                    target: "dispatch",
                    source_id = record.source_id,
                    message_id = record.message_id,
                    provider_event_id = %provider_event_id,
                    "calendar event created"
                );
                Ok(EventOutcome::Created { provider_event_id })
            }
        }
    }
}

fn source_name(agg: &Aggregate, source_id: Option<i64>, message_id: i64) -> Option<String> {
    let sid = source_id.or_else(|| agg.resolve(None, message_id).map(|m| m.source_id))?;
    agg.batch(sid).map(|b| b.name.clone())
}
