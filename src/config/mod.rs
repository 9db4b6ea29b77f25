// src/config/mod.rs
//! Application config: one TOML file plus env-resolved secrets.
//!
//! Lookup: `$SCOUT_CONFIG_PATH`, else `config/scout.toml`. Secrets written as
//! `"ENV"` are read from their env var at load time.

pub mod ai;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dedup::EVENT_MATCH_WINDOW_MINUTES;
use crate::ingest::{DEFAULT_FETCH_LIMIT, RECENCY_WINDOW_HOURS};
use crate::retry::RetryPolicy;

pub use ai::ClassifierConfig;

pub const ENV_CONFIG_PATH: &str = "SCOUT_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/scout.toml";

/// What to do with watermarks when classification fails after a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifyFailurePolicy {
    /// Advance anyway; the fetched messages are skipped for good.
    #[default]
    Advance,
    /// Leave watermarks untouched so the next run sees the messages again.
    Hold,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/scout.db")
}
fn default_env() -> String {
    "ENV".to_string()
}
fn default_chat_retry() -> RetryPolicy {
    RetryPolicy::CHAT
}
fn default_recency_hours() -> i64 {
    RECENCY_WINDOW_HOURS
}
fn default_event_window() -> i64 {
    EVENT_MATCH_WINDOW_MINUTES
}
fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source filter handed to the chat gateway (folder / list name).
    pub source_filter: String,
    /// Relays and the run summary go here.
    pub output_dialog_id: i64,
    /// Per-failure notifications go here.
    pub error_dialog_id: i64,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub relay_stagger_secs: u64,
    #[serde(default)]
    pub classify_failure_policy: ClassifyFailurePolicy,
    #[serde(default = "default_recency_hours")]
    pub recency_window_hours: i64,
    #[serde(default = "default_event_window")]
    pub event_match_window_minutes: i64,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    /// Prometheus textfile written after each run.
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
    pub gateway: GatewayConfig,
    pub classifier: ClassifierConfig,
    pub calendar: CalendarConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    /// "ENV" means: read from CHAT_GATEWAY_TOKEN
    #[serde(default = "default_env")]
    pub token: String,
    #[serde(default = "default_chat_retry")]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub calendar_id: String,
    /// "ENV" means: read from CALENDAR_ACCESS_TOKEN
    #[serde(default = "default_env")]
    pub access_token: String,
    /// Append the subscription link to the summary when events were created.
    #[serde(default = "default_true")]
    pub share_link: bool,
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.resolve()?;
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $SCOUT_CONFIG_PATH
    /// 2) config/scout.toml
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    fn resolve(&mut self) -> Result<()> {
        self.gateway.token = resolve_env(&self.gateway.token, "CHAT_GATEWAY_TOKEN")?;
        self.calendar.access_token =
            resolve_env(&self.calendar.access_token, "CALENDAR_ACCESS_TOKEN")?;
        self.classifier.resolve()?;

        if self.recency_window_hours <= 0 {
            self.recency_window_hours = default_recency_hours();
        }
        if self.event_match_window_minutes <= 0 {
            self.event_match_window_minutes = default_event_window();
        }
        if self.fetch_limit == 0 {
            self.fetch_limit = default_fetch_limit();
        }

        if chrono::Duration::try_hours(self.recency_window_hours).is_none() {
            bail!("recency_window_hours out of range: {}", self.recency_window_hours);
        }
        if chrono::Duration::try_minutes(self.event_match_window_minutes).is_none() {
            bail!(
                "event_match_window_minutes out of range: {}",
                self.event_match_window_minutes
            );
        }
        if stagger_duration(self.relay_stagger_secs).is_none() {
            bail!("relay_stagger_secs out of range: {}", self.relay_stagger_secs);
        }
        Ok(())
    }

    pub fn recency(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.recency_window_hours)
            .unwrap_or_else(|| chrono::Duration::hours(RECENCY_WINDOW_HOURS))
    }

    pub fn event_window(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.event_match_window_minutes)
            .unwrap_or_else(|| chrono::Duration::minutes(EVENT_MATCH_WINDOW_MINUTES))
    }

    pub fn relay_stagger(&self) -> chrono::Duration {
        stagger_duration(self.relay_stagger_secs).unwrap_or_else(chrono::Duration::zero)
    }
}

fn stagger_duration(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

fn resolve_env(value: &str, var: &str) -> Result<String> {
    if value.trim().eq_ignore_ascii_case("env") {
        std::env::var(var).map_err(|_| anyhow!("Missing {var} env var"))
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const MINIMAL: &str = r#"
source_filter = "Scout"
output_dialog_id = -100200
error_dialog_id = 42

[gateway]
base_url = "http://127.0.0.1:8088"
token = "gw-secret"

[classifier]
provider = "mock"
api_key = "unused"
base_prompt = "Return JSON."

[calendar]
calendar_id = "team@group.calendar.google.com"
access_token = "ENV"
"#;

    #[serial_test::serial]
    #[test]
    fn defaults_and_env_secrets() {
        env::set_var("CALENDAR_ACCESS_TOKEN", "cal-token");
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("scout.toml");
        fs::write(&p, MINIMAL).unwrap();

        let cfg = AppConfig::load_from(&p).unwrap();
        assert_eq!(cfg.calendar.access_token, "cal-token");
        assert_eq!(cfg.gateway.token, "gw-secret");
        assert_eq!(cfg.gateway.retry, RetryPolicy::CHAT);
        assert_eq!(cfg.classifier.retry, RetryPolicy::CLASSIFY);
        assert_eq!(cfg.classify_failure_policy, ClassifyFailurePolicy::Advance);
        assert_eq!(cfg.recency(), chrono::Duration::hours(24));
        assert_eq!(cfg.event_window(), chrono::Duration::minutes(120));
        assert_eq!(cfg.fetch_limit, 10_000);
        assert_eq!(cfg.relay_stagger_secs, 0);
        assert!(cfg.calendar.share_link);
        env::remove_var("CALENDAR_ACCESS_TOKEN");
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_secret_is_an_error() {
        env::remove_var("CALENDAR_ACCESS_TOKEN");
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("scout.toml");
        fs::write(&p, MINIMAL).unwrap();
        let err = AppConfig::load_from(&p).unwrap_err();
        assert!(format!("{err:#}").contains("CALENDAR_ACCESS_TOKEN"));
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallback() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::set_var("CALENDAR_ACCESS_TOKEN", "t");

        // nothing in CWD
        assert!(AppConfig::load_default().is_err());

        // explicit path that does not exist
        env::set_var(ENV_CONFIG_PATH, tmp.path().join("nope.toml"));
        assert!(AppConfig::load_default().is_err());

        // fallback location
        env::remove_var(ENV_CONFIG_PATH);
        fs::create_dir_all("config").unwrap();
        fs::write(
            DEFAULT_CONFIG_PATH,
            MINIMAL.replace("-100200", "-7").as_str(),
        )
        .unwrap();
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.output_dialog_id, -7);

        env::remove_var("CALENDAR_ACCESS_TOKEN");
        env::set_current_dir(&old).unwrap();
    }

    #[test]
    fn hold_policy_and_tunables_parse() {
        let src = MINIMAL.replace(
            "error_dialog_id = 42",
            "error_dialog_id = 42\nclassify_failure_policy = \"hold\"\nrelay_stagger_secs = 15\nfetch_limit = 0",
        );
        let mut cfg: AppConfig = toml::from_str(&src).unwrap();
        cfg.calendar.access_token = "x".into();
        cfg.resolve().unwrap();
        assert_eq!(cfg.classify_failure_policy, ClassifyFailurePolicy::Hold);
        assert_eq!(cfg.relay_stagger(), chrono::Duration::seconds(15));
        assert_eq!(cfg.fetch_limit, 10_000);
    }

    #[test]
    fn out_of_range_windows_are_rejected() {
        for line in [
            "recency_window_hours = 9223372036854775807",
            "event_match_window_minutes = 9223372036854775807",
            "relay_stagger_secs = 9223372036854775807",
        ] {
            let src = MINIMAL.replace("error_dialog_id = 42", &format!("error_dialog_id = 42\n{line}"));
            let mut cfg: AppConfig = toml::from_str(&src).unwrap();
            cfg.calendar.access_token = "x".into();
            let err = cfg.resolve().unwrap_err();
            assert!(format!("{err}").contains("out of range"), "{line}: {err}");
        }
    }
}
