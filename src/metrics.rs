// src/metrics.rs
//! Run counters and the Prometheus textfile export.
//!
//! The binary runs once and exits, so there is no scrape endpoint; the
//! rendered exposition is written to a file for node-exporter's textfile
//! collector instead.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const MESSAGES_FETCHED: &str = "scout_messages_fetched_total";
pub const RELAY_SENT: &str = "scout_relay_sent_total";
pub const RELAY_DUPLICATES: &str = "scout_relay_duplicates_total";
pub const EVENTS_CREATED: &str = "scout_events_created_total";
pub const EVENT_DUPLICATES: &str = "scout_event_duplicates_total";
pub const SOURCE_FAILURES: &str = "scout_source_failures_total";
pub const CANDIDATE_FAILURES: &str = "scout_candidate_failures_total";
pub const LAST_RUN_TS: &str = "scout_last_run_ts";

/// One-time metrics registration (so series carry help text).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(MESSAGES_FETCHED, "Messages fetched past the watermarks.");
        describe_counter!(RELAY_SENT, "Messages relayed to the output dialog.");
        describe_counter!(
            RELAY_DUPLICATES,
            "Relay candidates suppressed as same-run duplicates."
        );
        describe_counter!(EVENTS_CREATED, "Calendar events created.");
        describe_counter!(
            EVENT_DUPLICATES,
            "Event candidates matched to an existing event."
        );
        describe_counter!(SOURCE_FAILURES, "Sources skipped after fetch retries.");
        describe_counter!(
            CANDIDATE_FAILURES,
            "Relay or event candidates whose side effect failed."
        );
        describe_gauge!(LAST_RUN_TS, "Unix ts when the last run finished.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call at most once per process.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.render())
    }
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp = path.with_extension("prom.tmp");
    let mut f =
        fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(contents.as_bytes())?;
    f.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}
