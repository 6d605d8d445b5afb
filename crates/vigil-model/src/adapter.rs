use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{ChatRequest, Completion, ModelClient, ModelError, ModelProvider};

#[derive(Debug, Clone)]
pub struct ModelAdapterConfig {
    pub embedding_dimension: usize,
    /// In-flight call ceiling shared by all workers.
    pub max_in_flight: usize,
    pub complete_timeout: Duration,
    pub embed_timeout: Duration,
    /// Total attempts per call, first try included.
    pub retry_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ModelAdapterConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 768,
            max_in_flight: 16,
            complete_timeout: Duration::from_secs(30),
            embed_timeout: Duration::from_secs(10),
            retry_attempts: 5,
            backoff_base: Duration::from_millis(200),
        }
    }
}

#[derive(Default)]
struct Counters {
    completions: AtomicU64,
    embeddings: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

/// Token and call accounting; observational only.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub completions: u64,
    pub embeddings: u64,
    pub retries: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Wraps a provider with the full call policy: bounded concurrency,
/// per-call deadline, exponential backoff with jitter, token accounting.
/// Stateless per call otherwise.
#[derive(Clone)]
pub struct ModelAdapter {
    provider: Arc<dyn ModelProvider>,
    permits: Arc<Semaphore>,
    cfg: ModelAdapterConfig,
    counters: Arc<Counters>,
}

impl ModelAdapter {
    pub fn new(provider: Arc<dyn ModelProvider>, cfg: ModelAdapterConfig) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.max_in_flight.max(1)));
        Self {
            provider,
            permits,
            cfg,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            completions: self.counters.completions.load(Ordering::Relaxed),
            embeddings: self.counters.embeddings.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            prompt_tokens: self.counters.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.counters.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Backoff for the nth retry (1-based): base * 2^(n-1), jittered ±25%.
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exp = base.as_millis() as f64 * 2f64.powi(retry.saturating_sub(1) as i32);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((exp * jitter).round() as u64)
}

#[async_trait]
impl ModelClient for ModelAdapter {
    async fn complete(&self, req: ChatRequest) -> Result<Completion, ModelError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ModelError::Unavailable("connection pool closed".into()))?;
        let mut attempt: u32 = 0;
        loop {
            let outcome = match timeout(self.cfg.complete_timeout, self.provider.complete(req.clone()))
                .await
            {
                Ok(res) => res,
                Err(_) => Err(ModelError::Unavailable(format!(
                    "complete deadline {} ms exceeded",
                    self.cfg.complete_timeout.as_millis()
                ))),
            };
            match outcome {
                Ok(c) => {
                    self.counters.completions.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .prompt_tokens
                        .fetch_add(c.prompt_tokens, Ordering::Relaxed);
                    self.counters
                        .completion_tokens
                        .fetch_add(c.completion_tokens, Ordering::Relaxed);
                    return Ok(c);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.cfg.retry_attempts => {
                    attempt += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff_delay(self.cfg.backoff_base, attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying complete");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "complete failed");
                    return Err(e);
                }
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ModelError::Unavailable("connection pool closed".into()))?;
        let mut attempt: u32 = 0;
        loop {
            let outcome = match timeout(self.cfg.embed_timeout, self.provider.embed(text)).await {
                Ok(res) => res,
                Err(_) => Err(ModelError::Unavailable(format!(
                    "embed deadline {} ms exceeded",
                    self.cfg.embed_timeout.as_millis()
                ))),
            };
            match outcome {
                Ok(vector) => {
                    if vector.len() != self.cfg.embedding_dimension {
                        self.counters.failures.fetch_add(1, Ordering::Relaxed);
                        return Err(ModelError::Invalid(format!(
                            "embedding has dimension {}, expected {}",
                            vector.len(),
                            self.cfg.embedding_dimension
                        )));
                    }
                    self.counters.embeddings.fetch_add(1, Ordering::Relaxed);
                    return Ok(vector);
                }
                // Embed retries transport errors only.
                Err(e) if e.is_transport() && attempt + 1 < self.cfg.retry_attempts => {
                    attempt += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff_delay(self.cfg.backoff_base, attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying embed");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "embed failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyProvider {
        fail_first: u32,
        calls: AtomicU32,
        dim: usize,
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        async fn complete(&self, _req: ChatRequest) -> Result<Completion, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(ModelError::Unavailable("connection refused".into()))
            } else {
                Ok(Completion {
                    text: "ok".into(),
                    prompt_tokens: 10,
                    completion_tokens: 2,
                })
            }
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(ModelError::Throttled("slow down".into()))
            } else {
                Ok(vec![1.0; self.dim])
            }
        }
    }

    fn fast_cfg(dim: usize) -> ModelAdapterConfig {
        ModelAdapterConfig {
            embedding_dimension: dim,
            backoff_base: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn complete_retries_transient_failures() {
        let adapter = ModelAdapter::new(
            Arc::new(FlakyProvider {
                fail_first: 2,
                calls: AtomicU32::new(0),
                dim: 8,
            }),
            fast_cfg(8),
        );
        let out = adapter.complete(ChatRequest::new("hi")).await.unwrap();
        assert_eq!(out.text, "ok");
        let stats = adapter.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.completions, 1);
        assert_eq!(stats.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn complete_gives_up_after_budget() {
        let adapter = ModelAdapter::new(
            Arc::new(FlakyProvider {
                fail_first: u32::MAX,
                calls: AtomicU32::new(0),
                dim: 8,
            }),
            fast_cfg(8),
        );
        let err = adapter.complete(ChatRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
        assert_eq!(adapter.stats().retries, 4); // 5 attempts total
    }

    #[tokio::test]
    async fn embed_does_not_retry_throttling() {
        let adapter = ModelAdapter::new(
            Arc::new(FlakyProvider {
                fail_first: 1,
                calls: AtomicU32::new(0),
                dim: 8,
            }),
            fast_cfg(8),
        );
        let err = adapter.embed("text").await.unwrap_err();
        assert!(matches!(err, ModelError::Throttled(_)));
        assert_eq!(adapter.stats().retries, 0);
    }

    #[tokio::test]
    async fn wrong_dimension_is_invalid() {
        let adapter = ModelAdapter::new(
            Arc::new(FlakyProvider {
                fail_first: 0,
                calls: AtomicU32::new(0),
                dim: 8,
            }),
            fast_cfg(16),
        );
        let err = adapter.embed("text").await.unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));
    }

    #[test]
    fn backoff_grows_and_stays_jittered() {
        for retry in 1..=4 {
            let d = backoff_delay(Duration::from_millis(200), retry);
            let nominal = 200u64 << (retry - 1);
            let lo = (nominal as f64 * 0.75) as u64;
            let hi = (nominal as f64 * 1.25) as u64 + 1;
            assert!(d.as_millis() as u64 >= lo && d.as_millis() as u64 <= hi);
        }
    }
}
