use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::dispatch::{Provider, Request};
use crate::error::CliError;
use crate::response::{Metadata, Response};

/// In-process provider answering with one of its canned replies.
///
/// The random source is handed in at construction and owned by this
/// instance alone, so a seeded instance is fully reproducible.
pub struct SimulatedProvider {
    name: String,
    display_name: String,
    models: Vec<String>,
    default_model: Option<String>,
    replies: Vec<String>,
    latency_ms: RangeInclusive<u64>,
    timeout: Option<Duration>,
    rng: Mutex<StdRng>,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>, replies: Vec<String>, rng: StdRng) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            models: vec!["simulated".to_string()],
            default_model: None,
            replies,
            latency_ms: 0..=0,
            timeout: None,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        if !models.is_empty() {
            self.models = models;
        }
        self
    }

    /// Overrides the first listed model as the default. Empty is ignored.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.is_empty() {
            self.default_model = Some(model);
        }
        self
    }

    /// Replies slower than this fail with a timeout error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Each reply sleeps for a random duration drawn from this range.
    pub fn with_latency(mut self, latency_ms: RangeInclusive<u64>) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    fn draw(&self) -> (String, Duration) {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let reply = self.replies.choose(&mut *rng).cloned().unwrap_or_default();
        let delay = if self.latency_ms.is_empty() {
            0
        } else {
            rng.gen_range(self.latency_ms.clone())
        };
        (reply, Duration::from_millis(delay))
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_available(&self) -> bool {
        true
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    fn default_model(&self) -> &str {
        self.default_model
            .as_deref()
            .or_else(|| self.models.first().map(String::as_str))
            .unwrap_or_default()
    }

    fn timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| {
            Duration::from_millis(*self.latency_ms.end()) + Duration::from_secs(1)
        })
    }

    async fn execute(&self, req: &Request) -> Result<Response, CliError> {
        let start = Instant::now();
        // Lock released before sleeping.
        let (reply, delay) = self.draw();

        let timeout = self.timeout();
        let sleep = tokio::time::timeout(timeout, tokio::time::sleep(delay));
        let slept = match &req.cancellation {
            Some(token) => tokio::select! {
                res = sleep => res,
                () = token.cancelled() => return Err(CliError::cancelled(&self.name)),
            },
            None => sleep.await,
        };
        if let Err(elapsed) = slept {
            return Err(CliError::timeout(&self.name, timeout, elapsed));
        }

        let metadata = Metadata {
            duration: start.elapsed(),
            stop_reason: "end_turn".to_string(),
            ..Default::default()
        }
        .with_tokens(
            req.prompt.split_whitespace().count() as u64,
            reply.split_whitespace().count() as u64,
            None,
        );

        Ok(Response {
            content: reply.clone(),
            model: if req.model.is_empty() {
                self.default_model().to_string()
            } else {
                req.model.clone()
            },
            provider: self.name.clone(),
            metadata: Some(metadata),
            raw: reply,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn replies() -> Vec<String> {
        ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[tokio::test]
    async fn same_seed_same_sequence() {
        let a = SimulatedProvider::new("a", replies(), StdRng::seed_from_u64(42));
        let b = SimulatedProvider::new("b", replies(), StdRng::seed_from_u64(42));
        let req = Request::new("pick one");
        for _ in 0..8 {
            let ra = a.execute(&req).await.unwrap();
            let rb = b.execute(&req).await.unwrap();
            assert_eq!(ra.content, rb.content);
            assert_eq!(ra.raw, ra.content);
        }
    }

    #[tokio::test]
    async fn stamps_identity_and_usage() {
        let p = SimulatedProvider::new("sim", vec!["two words".to_string()], StdRng::seed_from_u64(1));
        let resp = p.execute(&Request::new("a b c")).await.unwrap();
        assert_eq!(resp.provider, "sim");
        assert_eq!(resp.model, "simulated");
        let meta = resp.metadata.unwrap();
        assert_eq!(meta.input_tokens, 3);
        assert_eq!(meta.output_tokens, 2);
        assert_eq!(meta.total_tokens, 5);
    }

    #[tokio::test]
    async fn configured_default_model_and_timeout() {
        let p = SimulatedProvider::new("sim", vec!["late".to_string()], StdRng::seed_from_u64(1))
            .with_models(vec!["fast".to_string(), "slow".to_string()])
            .with_default_model("slow")
            .with_latency(500..=500)
            .with_timeout(Duration::from_millis(20));
        assert_eq!(p.default_model(), "slow");
        assert_eq!(p.timeout(), Duration::from_millis(20));

        let err = p.execute(&Request::new("x")).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn no_replies_yields_empty_content() {
        let p = SimulatedProvider::new("sim", vec![], StdRng::seed_from_u64(1));
        assert_eq!(p.execute(&Request::new("x")).await.unwrap().content, "");
    }
}
