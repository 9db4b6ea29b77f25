// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

use crate::retry::RetryPolicy;

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_retry() -> RetryPolicy {
    RetryPolicy::CLASSIFY
}

/// `[classifier]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// "openai" | "gemini" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY / GEMINI_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// System prompt, inline.
    #[serde(default)]
    pub base_prompt: String,
    /// System prompt, from a file. Used when `base_prompt` is empty.
    #[serde(default)]
    pub base_prompt_path: Option<PathBuf>,
    #[serde(default = "default_retry")]
    pub retry: RetryPolicy,
}

impl ClassifierConfig {
    /// Normalize the provider, resolve the key and load the prompt.
    pub fn resolve(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                "gemini" => env::var("GEMINI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing GEMINI_API_KEY env var"))?,
                "mock" => String::new(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if self.base_prompt.trim().is_empty() {
            let Some(path) = &self.base_prompt_path else {
                anyhow::bail!("classifier needs base_prompt or base_prompt_path");
            };
            self.base_prompt = fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("reading base prompt {}: {e}", path.display())
            })?;
        }
        if self.base_prompt.trim().is_empty() && self.provider != "mock" {
            anyhow::bail!("classifier base prompt is empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ClassifierConfig {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn defaults_to_gemini_env_key_and_classify_budget() {
        let c = parse(r#"base_prompt = "find events""#);
        assert_eq!(c.provider, "gemini");
        assert_eq!(c.api_key, "ENV");
        assert_eq!(c.retry, RetryPolicy::CLASSIFY);
    }

    #[test]
    fn prompt_file_is_read_when_inline_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("prompt.txt");
        fs::write(&p, "Return JSON.").unwrap();
        let mut c = parse(&format!(
            "provider = \"Mock\"\nbase_prompt_path = {:?}",
            p.display().to_string()
        ));
        c.resolve().unwrap();
        assert_eq!(c.provider, "mock");
        assert_eq!(c.base_prompt, "Return JSON.");
    }

    #[test]
    fn missing_prompt_is_an_error() {
        let mut c = parse(r#"provider = "mock""#);
        assert!(c.resolve().is_err());
    }

    #[test]
    fn unknown_provider_with_env_key_is_rejected() {
        let mut c = parse("provider = \"claude\"\nbase_prompt = \"x\"");
        assert!(c.resolve().is_err());
    }
}
