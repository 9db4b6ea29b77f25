// src/engine.rs
//! Run orchestrator.
//!
//! One run walks `Init → ListSources → PerSourceFetch → Aggregate → Classify →
//! Dispatch → PersistWatermarks → Summarize → Done`. Per-source and
//! per-candidate failures are reported and skipped; only listing sources and
//! classification can abort the run, and even then a summary goes out.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};

use crate::calendar::Calendar;
use crate::classify::{serialize_batch, ClassificationAdapter, Verdict};
use crate::config::{AppConfig, ClassifyFailurePolicy};
use crate::dedup::EventGate;
use crate::dispatch::{CandidateFailure, CandidateKind, DispatchContext, Dispatcher};
use crate::error::SyncError;
use crate::ingest::types::{ChatSource, Source};
use crate::ingest::{fetch_new_messages, Aggregate, FetchParams, SourceBatch};
use crate::metrics as m;
use crate::notify::{Notification, NotifierMux};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{EventRecordStore, WatermarkStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    ListSources,
    PerSourceFetch,
    Aggregate,
    Classify,
    Dispatch,
    PersistWatermarks,
    Summarize,
    Done,
}

/// Knobs for one run, usually taken from `AppConfig`.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub source_filter: String,
    pub output_dialog_id: i64,
    pub list_policy: RetryPolicy,
    pub fetch: FetchParams,
    pub event_window: Duration,
    pub relay_stagger: Duration,
    pub classify_failure_policy: ClassifyFailurePolicy,
    pub share_calendar_link: bool,
}

impl RunSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            source_filter: cfg.source_filter.clone(),
            output_dialog_id: cfg.output_dialog_id,
            list_policy: cfg.gateway.retry,
            fetch: FetchParams {
                policy: cfg.gateway.retry,
                limit: cfg.fetch_limit,
                recency: cfg.recency(),
            },
            event_window: cfg.event_window(),
            relay_stagger: cfg.relay_stagger(),
            classify_failure_policy: cfg.classify_failure_policy,
            share_calendar_link: cfg.calendar.share_link,
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            source_filter: String::new(),
            output_dialog_id: 0,
            list_policy: RetryPolicy::CHAT,
            fetch: FetchParams::default(),
            event_window: EventGate::default().window(),
            relay_stagger: Duration::zero(),
            classify_failure_policy: ClassifyFailurePolicy::default(),
            share_calendar_link: true,
        }
    }
}

/// Counts reported at the end of every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub sources_listed: usize,
    pub sources_failed: usize,
    /// Messages sent to the classifier.
    pub processed: usize,
    /// Relay candidates in the verdict.
    pub messages_found: usize,
    /// Event candidates in the verdict.
    pub events_found: usize,
    pub relayed: usize,
    pub relay_duplicates: usize,
    pub events_created: usize,
    pub event_duplicates: usize,
    pub watermarks_advanced: usize,
    pub failures: usize,
    /// Set when a run-fatal step stopped the run.
    pub aborted: Option<String>,
    pub calendar_link: Option<String>,
}

impl RunSummary {
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Execution completed\n");
        let _ = writeln!(out, "Processed messages: {}", self.processed);
        let _ = writeln!(
            out,
            "Messages found: {} (relayed {}, duplicates {})",
            self.messages_found, self.relayed, self.relay_duplicates
        );
        let _ = writeln!(
            out,
            "Events found: {} (created {}, already known {})",
            self.events_found, self.events_created, self.event_duplicates
        );
        if self.sources_failed > 0 {
            let _ = writeln!(
                out,
                "Sources failed: {} of {}",
                self.sources_failed, self.sources_listed
            );
        }
        if self.failures > 0 {
            let _ = writeln!(out, "Failures: {}", self.failures);
        }
        if let Some(reason) = &self.aborted {
            let _ = writeln!(out, "Run aborted: {reason}");
        }
        if let Some(link) = &self.calendar_link {
            let _ = writeln!(out, "Calendar: {link}");
        }
        out.trim_end().to_string()
    }
}

pub struct Orchestrator {
    chat: Arc<dyn ChatSource>,
    classifier: ClassificationAdapter,
    calendar: Arc<dyn Calendar>,
    watermarks: Arc<dyn WatermarkStore>,
    events: Arc<dyn EventRecordStore>,
    notifier: NotifierMux,
    settings: RunSettings,
}

/// Scratch state of a single run.
struct Run {
    now: DateTime<Utc>,
    summary: RunSummary,
    sources: Vec<Source>,
    batches: Vec<SourceBatch>,
    aggregate: Aggregate,
    verdict: Option<Verdict>,
    classify_failed: bool,
}

impl Orchestrator {
    pub fn new(
        chat: Arc<dyn ChatSource>,
        classifier: ClassificationAdapter,
        calendar: Arc<dyn Calendar>,
        watermarks: Arc<dyn WatermarkStore>,
        events: Arc<dyn EventRecordStore>,
        notifier: NotifierMux,
        settings: RunSettings,
    ) -> Self {
        Self {
            chat,
            classifier,
            calendar,
            watermarks,
            events,
            notifier,
            settings,
        }
    }

    /// Execute one run at `now`. Never fails: every outcome ends in a summary.
    pub async fn run(&self, now: DateTime<Utc>) -> RunSummary {
        m::ensure_metrics_described();
        let mut run = Run {
            now,
            summary: RunSummary {
                started_at: Some(now),
                ..RunSummary::default()
            },
            sources: Vec::new(),
            batches: Vec::new(),
            aggregate: Aggregate::default(),
            verdict: None,
            classify_failed: false,
        };

        let mut state = RunState::Init;
        while state != RunState::Done {
            tracing::debug!(target: "scout", ?state, "enter");
            state = match state {
                RunState::Init => RunState::ListSources,
                RunState::ListSources => self.list_sources(&mut run).await,
                RunState::PerSourceFetch => self.fetch_all(&mut run).await,
                RunState::Aggregate => {
                    run.aggregate = Aggregate::build(std::mem::take(&mut run.batches));
                    run.summary.processed = run.aggregate.len();
                    if run.aggregate.is_empty() {
                        RunState::Summarize
                    } else {
                        RunState::Classify
                    }
                }
                RunState::Classify => self.classify(&mut run).await,
                RunState::Dispatch => self.dispatch(&mut run).await,
                RunState::PersistWatermarks => self.persist_watermarks(&mut run),
                RunState::Summarize => {
                    self.summarize(&mut run).await;
                    RunState::Done
                }
                RunState::Done => RunState::Done,
            };
        }
        run.summary
    }

    async fn list_sources(&self, run: &mut Run) -> RunState {
        let chat = self.chat.as_ref();
        let filter = self.settings.source_filter.as_str();
        match with_retry(self.settings.list_policy, "list_sources", |_| {
            chat.list_sources(filter)
        })
        .await
        {
            Ok(sources) => {
                tracing::info!(target: "scout", sources = sources.len(), filter, "sources listed");
                run.summary.sources_listed = sources.len();
                run.sources = sources;
                RunState::PerSourceFetch
            }
            Err(e) => {
                let err = SyncError::TerminalRun {
                    step: "list_sources",
                    attempts: e.attempts,
                    reason: e.reason(),
                };
                self.abort(run, &err).await;
                RunState::Summarize
            }
        }
    }

    async fn fetch_all(&self, run: &mut Run) -> RunState {
        for source in std::mem::take(&mut run.sources) {
            let watermark = match self.watermarks.get(source.id) {
                Ok(w) => w,
                Err(e) => {
                    self.source_failed(run, &source, format!("reading watermark: {e:#}"))
                        .await;
                    continue;
                }
            };

            let messages = match fetch_new_messages(
                self.chat.as_ref(),
                &source,
                watermark.as_ref(),
                run.now,
                &self.settings.fetch,
            )
            .await
            {
                Ok(msgs) => msgs,
                Err(e) => {
                    self.source_failed(run, &source, e.to_string()).await;
                    continue;
                }
            };
            if messages.is_empty() {
                continue;
            }
            counter!(m::MESSAGES_FETCHED).increment(messages.len() as u64);

            let name = messages
                .iter()
                .find_map(|m| m.chat_title.clone())
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| source.display_name());
            if let Err(e) = self.watermarks.upsert_name(source.id, &name) {
                tracing::warn!(target: "scout", source_id = source.id, error = %format!("{e:#}"), "storing source name failed");
            }
            tracing::info!(target: "scout", source_id = source.id, name = %name, messages = messages.len(), "source fetched");
            run.batches.push(SourceBatch {
                source,
                name,
                messages,
            });
        }
        RunState::Aggregate
    }

    async fn classify(&self, run: &mut Run) -> RunState {
        let batch = serialize_batch(&run.aggregate);
        match self.classifier.classify(&batch).await {
            Ok(verdict) => {
                if !verdict.relevant {
                    tracing::info!(target: "scout", "classifier flagged batch as not relevant");
                }
                run.summary.messages_found = verdict.relay_candidates.len();
                run.summary.events_found = verdict.event_candidates.len();
                run.verdict = Some(verdict);
                RunState::Dispatch
            }
            Err(err) => {
                run.classify_failed = true;
                if err.is_run_fatal() {
                    self.abort(run, &err).await;
                } else {
                    run.summary.failures += 1;
                    self.notify_failure(run, "Classification failed", err.to_string())
                        .await;
                }
                RunState::PersistWatermarks
            }
        }
    }

    async fn dispatch(&self, run: &mut Run) -> RunState {
        let Some(verdict) = run.verdict.take() else {
            return RunState::PersistWatermarks;
        };
        let mut ctx = DispatchContext::new(
            run.now,
            self.settings.relay_stagger,
            EventGate::new(self.settings.event_window),
            self.settings.output_dialog_id,
        );
        let dispatcher = Dispatcher {
            chat: self.chat.as_ref(),
            calendar: self.calendar.as_ref(),
            events: self.events.as_ref(),
        };
        let report = dispatcher.dispatch(&mut ctx, &run.aggregate, &verdict).await;

        run.summary.relayed = report.relayed;
        run.summary.relay_duplicates = report.relay_duplicates;
        run.summary.events_created = report.events_created;
        run.summary.event_duplicates = report.event_duplicates;
        for f in &report.failures {
            run.summary.failures += 1;
            let (title, body) = describe_candidate_failure(f);
            self.notify_failure(run, title, body).await;
        }
        RunState::PersistWatermarks
    }

    fn persist_watermarks(&self, run: &mut Run) -> RunState {
        if run.classify_failed
            && self.settings.classify_failure_policy == ClassifyFailurePolicy::Hold
        {
            tracing::warn!(target: "scout", "classification failed; holding watermarks");
            return RunState::Summarize;
        }
        for batch in &run.aggregate.batches {
            let Some((id, ts)) = batch.high_water() else {
                continue;
            };
            match self.watermarks.advance(batch.source.id, id, ts) {
                Ok(()) => run.summary.watermarks_advanced += 1,
                Err(e) => {
                    run.summary.failures += 1;
                    tracing::error!(
                        target: "scout",
                        source_id = batch.source.id,
                        error = %format!("{e:#}"),
                        "advancing watermark failed"
                    );
                }
            }
        }
        RunState::Summarize
    }

    async fn summarize(&self, run: &mut Run) {
        if run.summary.events_created > 0 && self.settings.share_calendar_link {
            run.summary.calendar_link = self.calendar.subscription_link();
        }
        gauge!(m::LAST_RUN_TS).set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "scout",
            processed = run.summary.processed,
            messages_found = run.summary.messages_found,
            events_found = run.summary.events_found,
            relayed = run.summary.relayed,
            events_created = run.summary.events_created,
            failures = run.summary.failures,
            aborted = run.summary.is_aborted(),
            "run finished"
        );
        self.notifier
            .notify(&Notification::summary(run.summary.render(), run.now))
            .await;
    }

    async fn abort(&self, run: &mut Run, err: &SyncError) {
        tracing::error!(target: "scout", error = %err, "run-fatal step failed");
        run.summary.failures += 1;
        run.summary.aborted = Some(err.to_string());
        self.notify_failure(run, "Run aborted", err.to_string()).await;
    }

    async fn source_failed(&self, run: &mut Run, source: &Source, reason: String) {
        counter!(m::SOURCE_FAILURES).increment(1);
        run.summary.sources_failed += 1;
        run.summary.failures += 1;
        tracing::warn!(target: "scout", source_id = source.id, reason = %reason, "source skipped");
        self.notify_failure(
            run,
            "Source failed",
            format!(
                "Error fetching messages for dialog {} ({}).\nError: {reason}",
                source.display_name(),
                source.id
            ),
        )
        .await;
    }

    async fn notify_failure(&self, run: &Run, title: &str, body: String) {
        self.notifier
            .notify(&Notification::failure(title, body, run.now))
            .await;
    }
}

fn describe_candidate_failure(f: &CandidateFailure) -> (&'static str, String) {
    let chat = f.source_name.as_deref().unwrap_or("unknown chat");
    match f.kind {
        CandidateKind::Relay => (
            "Relay failed",
            format!(
                "Error processing message {},\nFrom chat: {chat},\nError: {}",
                f.message_id, f.reason
            ),
        ),
        CandidateKind::Event => (
            "Event failed",
            format!(
                "Error creating event from message {},\nFrom chat: {chat},\nError: {}",
                f.message_id, f.reason
            ),
        ),
    }
}
