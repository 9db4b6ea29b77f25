//! dialog-scout binary: one scan run per invocation.
//!
//! Scheduling (cron, systemd timer) lives outside; overlapping runs are not
//! supported. Exit code is non-zero when the run was aborted.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use dialog_scout::calendar::GoogleCalendar;
use dialog_scout::classify::{build_provider, ClassificationAdapter};
use dialog_scout::config::AppConfig;
use dialog_scout::ingest::gateway::HttpChatGateway;
use dialog_scout::ingest::types::ChatSource;
use dialog_scout::metrics::Metrics;
use dialog_scout::notify::{ChatNotifier, NotifierMux};
use dialog_scout::store::SqliteStore;
use dialog_scout::{init_tracing, Orchestrator, RunSettings, RunSummary};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    match run_once().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(target: "scout", error = %format!("{e:#}"), "startup failed");
            ExitCode::from(2)
        }
    }
}

/// `Ok(true)` when the run completed, `Ok(false)` when it was aborted.
async fn run_once() -> Result<bool> {
    let cfg = AppConfig::load_default()?;

    let metrics = match &cfg.metrics_textfile {
        Some(_) => Some(Metrics::install()?),
        None => None,
    };

    let store = Arc::new(SqliteStore::open(&cfg.state_path)?);
    let chat: Arc<dyn ChatSource> = Arc::new(HttpChatGateway::new(
        &cfg.gateway.base_url,
        cfg.gateway.token.clone(),
    )?);
    let provider = build_provider(&cfg.classifier)?;
    let classifier = ClassificationAdapter::new(provider, cfg.classifier.retry);
    let calendar = Arc::new(GoogleCalendar::new(
        cfg.calendar.calendar_id.clone(),
        cfg.calendar.access_token.clone(),
    )?);
    let notifier = NotifierMux::from_env().with(Box::new(ChatNotifier::new(
        chat.clone(),
        cfg.output_dialog_id,
        cfg.error_dialog_id,
    )));

    tracing::info!(
        target: "scout",
        provider = classifier.provider_name(),
        gateway = chat.name(),
        sinks = notifier.len(),
        "starting run"
    );

    let orchestrator = Orchestrator::new(
        chat,
        classifier,
        calendar,
        store.clone(),
        store,
        notifier,
        RunSettings::from_config(&cfg),
    );
    let summary = orchestrator.run(Utc::now()).await;

    Ok(finish_run(
        &summary,
        metrics.as_ref(),
        cfg.metrics_textfile.as_deref(),
    ))
}

/// The exit outcome is the run's own; a failed metrics export is only logged.
fn finish_run(summary: &RunSummary, metrics: Option<&Metrics>, textfile: Option<&Path>) -> bool {
    if let (Some(m), Some(path)) = (metrics, textfile) {
        if let Err(e) = m
            .write_textfile(path)
            .with_context(|| format!("writing metrics to {}", path.display()))
        {
            tracing::warn!(target: "scout", error = %format!("{e:#}"), "metrics export failed");
        }
    }
    !summary.is_aborted()
}
