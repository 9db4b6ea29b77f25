// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod calendar;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod retry;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::engine::{Orchestrator, RunSettings, RunSummary};
pub use crate::error::SyncError;
pub use crate::notify::{Notification, NotifierMux};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crate targets at info, everything else at warn.
pub const DEFAULT_LOG_FILTER: &str =
    "dialog_scout=info,scout=info,ingest=info,classify=info,dedup=info,dispatch=info,notify=info,store=info,warn";

/// Install the global tracing subscriber. `SCOUT_LOG_JSON=1` switches to JSON lines.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("SCOUT_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    // a second init (tests) is a no-op
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}
