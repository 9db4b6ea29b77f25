// src/retry.rs
//! Fixed-delay retry wrapper used around every external call that has a budget.
//!
//! The policy is a plain value so each budget (fetch, list, classify) can be
//! tested on its own; sleeping goes through `tokio::time`, so tests drive it
//! with a paused clock.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "secs")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Chat collaborator budget: list sources / fetch messages.
    pub const CHAT: RetryPolicy = RetryPolicy::fixed(5, Duration::from_secs(10));
    /// Classifier budget.
    pub const CLASSIFY: RetryPolicy = RetryPolicy::fixed(10, Duration::from_secs(30));

    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Single attempt, no waiting.
    pub const fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Returned when every attempt failed; carries the last error.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: anyhow::Error,
}

impl RetryExhausted {
    pub fn reason(&self) -> String {
        format!("{:#}", self.last_error)
    }
}

/// Call `op` until it succeeds or the policy runs out. `op` receives the
/// 1-based attempt number. Every error kind is retried the same way.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(v) => {
                if attempt > 1 {
                    tracing::debug!(label, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) if attempt < max => {
                tracing::warn!(label, attempt, max, error = %format!("{e:#}"), "attempt failed, retrying");
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                tracing::warn!(label, attempt, error = %format!("{e:#}"), "retry budget exhausted");
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
