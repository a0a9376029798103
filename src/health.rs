//! Liveness probing: ask a provider an arithmetic question with one correct
//! answer and check it comes back verbatim.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;

use crate::dispatch::registry::Registry;
use crate::dispatch::{Provider, Request};

pub const HEALTH_PROMPT: &str = "1+1? One digit answer only";

pub const HEALTH_EXPECTED: &str = "2";

/// Probe deadline, independent of the provider's own timeout.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Longer replies are cut to this many chars in the error text.
const MAX_REPLY_PREVIEW: usize = 120;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub available: bool,
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone)]
pub struct HealthChecker {
    timeout: Duration,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self {
            timeout: HEALTH_TIMEOUT,
        }
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send the probe to `provider` using `model` (empty = provider default).
    pub async fn check(&self, provider: &dyn Provider, model: &str) -> HealthStatus {
        let start = Instant::now();
        let req = Request::new(HEALTH_PROMPT).with_model(model);

        let error = match tokio::time::timeout(self.timeout, provider.execute(&req)).await {
            Ok(Ok(resp)) => classify_reply(&resp.content),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "health check timed out after {}s",
                self.timeout.as_secs_f64()
            )),
        };

        let status = HealthStatus {
            available: error.is_none(),
            latency: start.elapsed(),
            error,
            checked_at: Utc::now(),
        };

        tracing::info!(
            provider = %provider.name(),
            available = status.available,
            latency_ms = status.latency.as_millis() as u64,
            error = status.error.as_deref().unwrap_or(""),
            "health check complete"
        );

        status
    }

    /// Probe every registered provider concurrently with its default model.
    pub async fn check_all(&self, registry: &Registry) -> Vec<(String, HealthStatus)> {
        let providers = registry.list();
        let checks = providers.iter().map(|p| async move {
            let status = self.check(p.as_ref(), p.default_model()).await;
            (p.name().to_string(), status)
        });
        join_all(checks).await
    }
}

/// `None` when the reply is the expected answer, else why it is not.
fn classify_reply(content: &str) -> Option<String> {
    let reply = content.trim();
    if reply == HEALTH_EXPECTED {
        return None;
    }
    if reply.is_empty() {
        return Some("empty response".to_string());
    }
    let preview: String = if reply.chars().count() > MAX_REPLY_PREVIEW {
        let cut: String = reply.chars().take(MAX_REPLY_PREVIEW).collect();
        format!("{cut}...")
    } else {
        reply.to_string()
    };
    Some(format!("unexpected response: {preview:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_reply_tolerates_whitespace() {
        assert_eq!(classify_reply("  2\n"), None);
    }

    #[test]
    fn wrong_reply_is_quoted() {
        assert_eq!(
            classify_reply("two").as_deref(),
            Some("unexpected response: \"two\"")
        );
    }

    #[test]
    fn long_reply_truncated() {
        let msg = classify_reply(&"a".repeat(500)).unwrap();
        assert!(msg.contains(&format!("{}...", "a".repeat(MAX_REPLY_PREVIEW))));
        assert!(!msg.contains(&"a".repeat(MAX_REPLY_PREVIEW + 1)));
    }

    #[test]
    fn multi_digit_answer_rejected() {
        assert!(classify_reply("22").is_some());
    }
}
