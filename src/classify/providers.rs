// src/classify/providers.rs
//! Classifier providers. Each one does a single remote call and hands back the
//! raw answer text; retry and schema checks live in the adapter.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::ai::ClassifierConfig;

const USER_AGENT: &str = "dialog-scout/0.1";

pub trait ClassifierProvider: Send + Sync + 'static {
    fn complete<'a>(
        &'a self,
        batch: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

/// Build the provider named in config. `AI_TEST_MODE=mock` forces the mock.
pub fn build_provider(cfg: &ClassifierConfig) -> Result<Arc<dyn ClassifierProvider>> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockProvider::fixed("None")));
    }
    match cfg.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            cfg.api_key.clone(),
            cfg.model.as_deref(),
            cfg.base_prompt.clone(),
        )?)),
        "gemini" => Ok(Arc::new(GeminiProvider::new(
            cfg.api_key.clone(),
            cfg.model.as_deref(),
            cfg.base_prompt.clone(),
        )?)),
        "mock" => Ok(Arc::new(MockProvider::fixed("None"))),
        other => bail!("unsupported classifier provider: {other}"),
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .context("building classifier http client")
}

// ------------------------------------------------------------
// OpenAI
// ------------------------------------------------------------

/// Chat Completions in JSON mode.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<&str>, system_prompt: String) -> Result<Self> {
        Ok(Self {
            http: http_client(Duration::from_secs(120))?,
            api_key,
            model: model.unwrap_or("gpt-4o-mini").to_string(),
            system_prompt,
        })
    }
}

impl ClassifierProvider for OpenAiProvider {
    fn complete<'a>(
        &'a self,
        batch: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                bail!("OPENAI_API_KEY is empty");
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct ResponseFormat {
                #[serde(rename = "type")]
                kind: &'static str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                response_format: ResponseFormat,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: &self.system_prompt,
                    },
                    Msg {
                        role: "user",
                        content: batch,
                    },
                ],
                temperature: 0.0,
                response_format: ResponseFormat {
                    kind: "json_object",
                },
            };

            let resp = self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .context("openai request")?;
            let status = resp.status();
            if !status.is_success() {
                bail!("openai returned {status}");
            }
            let body: Resp = resp.json().await.context("openai body")?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| anyhow!("openai answer had no content"))
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Gemini
// ------------------------------------------------------------

/// `generateContent` with the base prompt as system instruction.
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: Option<&str>, system_prompt: String) -> Result<Self> {
        Ok(Self {
            http: http_client(Duration::from_secs(120))?,
            api_key,
            model: model.unwrap_or("gemini-2.0-flash").to_string(),
            system_prompt,
        })
    }
}

impl ClassifierProvider for GeminiProvider {
    fn complete<'a>(
        &'a self,
        batch: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                bail!("GEMINI_API_KEY is empty");
            }

            #[derive(Serialize)]
            struct Part<'a> {
                text: &'a str,
            }
            #[derive(Serialize)]
            struct Content<'a> {
                parts: Vec<Part<'a>>,
            }
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Req<'a> {
                system_instruction: Content<'a>,
                contents: Vec<Content<'a>>,
            }
            #[derive(Deserialize)]
            struct Resp {
                #[serde(default)]
                candidates: Vec<Candidate>,
            }
            #[derive(Deserialize)]
            struct Candidate {
                content: RespContent,
            }
            #[derive(Deserialize)]
            struct RespContent {
                #[serde(default)]
                parts: Vec<RespPart>,
            }
            #[derive(Deserialize)]
            struct RespPart {
                #[serde(default)]
                text: String,
            }

            let req = Req {
                system_instruction: Content {
                    parts: vec![Part {
                        text: &self.system_prompt,
                    }],
                },
                contents: vec![Content {
                    parts: vec![Part { text: batch }],
                }],
            };
            let url = format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                self.model
            );

            let resp = self
                .http
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(&req)
                .send()
                .await
                .context("gemini request")?;
            let status = resp.status();
            if !status.is_success() {
                bail!("gemini returned {status}");
            }
            let body: Resp = resp.json().await.context("gemini body")?;
            let text: String = body
                .candidates
                .into_iter()
                .next()
                .map(|c| c.content.parts.into_iter().map(|p| p.text).collect())
                .unwrap_or_default();
            if text.trim().is_empty() {
                bail!("gemini answer had no text");
            }
            Ok(text)
        })
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// ------------------------------------------------------------
// Mock
// ------------------------------------------------------------

/// Scripted provider for tests and local runs. Queued answers are served in
/// order; once the queue is drained every call returns `fallback`.
pub struct MockProvider {
    queue: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn fixed(answer: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: answer.to_string(),
            calls: AtomicU32::new(0),
        }
    }

    /// Queue a raw answer.
    pub fn push_answer(&self, answer: impl Into<String>) {
        self.enqueue(Ok(answer.into()));
    }

    /// Queue a transport failure.
    pub fn push_error(&self, error: impl Into<String>) {
        self.enqueue(Err(error.into()));
    }

    fn enqueue(&self, item: Result<String, String>) {
        self.queue
            .lock()
            .expect("mock queue poisoned")
            .push_back(item);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ClassifierProvider for MockProvider {
    fn complete<'a>(
        &'a self,
        _batch: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.queue.lock().expect("mock queue poisoned").pop_front();
        let out = match next {
            Some(Ok(s)) => Ok(s),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(self.fallback.clone()),
        };
        Box::pin(async move { out })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationAdapter;
    use crate::error::SyncError;
    use crate::retry::RetryPolicy;

    #[tokio::test]
    async fn mock_serves_queue_then_fallback() {
        let m = MockProvider::fixed("None");
        m.push_error("503");
        m.push_answer("{}");
        assert!(m.complete("x").await.is_err());
        assert_eq!(m.complete("x").await.unwrap(), "{}");
        assert_eq!(m.complete("x").await.unwrap(), "None");
        assert_eq!(m.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_retries_transport_errors_then_parses() {
        let m = Arc::new(MockProvider::fixed("None"));
        m.push_error("timeout");
        m.push_error("timeout");
        m.push_answer(r#"{"relevant": true, "results": [{"message_id": 4}], "events": []}"#);
        let adapter = ClassificationAdapter::new(m.clone(), RetryPolicy::CLASSIFY);

        let v = adapter.classify("[]").await.unwrap();
        assert_eq!(v.relay_candidates.len(), 1);
        assert_eq!(m.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_exhaustion_is_run_fatal() {
        let m = Arc::new(MockProvider::fixed("None"));
        for _ in 0..3 {
            m.push_error("down");
        }
        let adapter =
            ClassificationAdapter::new(m.clone(), RetryPolicy::fixed(3, Duration::from_secs(30)));

        let err = adapter.classify("[]").await.unwrap_err();
        assert!(err.is_run_fatal());
        assert!(matches!(err, SyncError::TerminalRun { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn schema_errors_are_not_retried() {
        let m = Arc::new(MockProvider::fixed("not json at all"));
        let adapter = ClassificationAdapter::new(m.clone(), RetryPolicy::CLASSIFY);

        let err = adapter.classify("[]").await.unwrap_err();
        assert!(matches!(err, SyncError::ClassificationSchema(_)));
        assert_eq!(m.calls(), 1);
    }
}
