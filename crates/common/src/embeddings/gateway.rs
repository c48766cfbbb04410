//! Embedding gateway
//!
//! Wraps an [`Embedder`] with an optional Redis cache, bounded retries with
//! exponential backoff and a dimension check. Every store write and every
//! vector query goes through here.

use super::Embedder;
use crate::cache::{keys, Cache};
use crate::cache::CacheConfig;
use crate::config::{AppConfig, EmbeddingConfig};
use crate::errors::{AppError, Result};
use crate::metrics;
use backoff::ExponentialBackoffBuilder;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry settings for provider calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per text, including the first
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_interval: Duration::from_millis(config.backoff_initial_ms),
            max_interval: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

/// Cached, retrying front for an embedding provider
#[derive(Clone)]
pub struct EmbeddingGateway {
    embedder: Arc<dyn Embedder>,
    policy: RetryPolicy,
    cache: Option<Cache>,
    cache_ttl_secs: u64,
}

impl EmbeddingGateway {
    pub fn new(embedder: Arc<dyn Embedder>, policy: RetryPolicy) -> Self {
        Self {
            embedder,
            policy,
            cache: None,
            cache_ttl_secs: 0,
        }
    }

    /// Build the provider from configuration and attach the Redis cache when configured.
    ///
    /// An unreachable cache is logged and skipped.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let embedder = super::create_embedder(&config.embedding)?;
        let gateway = Self::new(embedder, RetryPolicy::from_config(&config.embedding));

        let Some(ref url) = config.redis.url else {
            return Ok(gateway);
        };

        match Cache::new(CacheConfig::new(url.clone())).await {
            Ok(cache) => Ok(gateway.with_cache(cache, config.redis.embedding_ttl_secs)),
            Err(e) => {
                warn!(error = %e, "Embedding cache disabled");
                Ok(gateway)
            }
        }
    }

    /// Enable the Redis embedding cache
    pub fn with_cache(mut self, cache: Cache, ttl_secs: u64) -> Self {
        self.cache = Some(cache);
        self.cache_ttl_secs = ttl_secs;
        self
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Embed a text, consulting the cache first.
    ///
    /// Transient provider failures are retried up to `max_attempts` times;
    /// exhaustion and permanent failures surface as `EmbeddingFailure`.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let cache_key = keys::embedding(&keys::text_hash(text), self.model_name());

        if let Some(ref cache) = self.cache {
            match cache.get::<Vec<f32>>(&cache_key).await {
                Ok(Some(vector)) if vector.len() == self.dimension() => {
                    metrics::record_cache(true, "embedding");
                    return Ok(vector);
                }
                Ok(_) => metrics::record_cache(false, "embedding"),
                Err(e) => warn!(error = %e, "Embedding cache unavailable, calling provider"),
            }
        }

        let vector = self.embed_with_retry(text).await?;

        if let Some(ref cache) = self.cache {
            if let Err(e) = cache.set_with_ttl(&cache_key, &vector, self.cache_ttl_secs).await {
                warn!(error = %e, "Failed to cache embedding, continuing without cache");
            }
        }

        Ok(vector)
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let max_attempts = self.policy.max_attempts;
        let expected = self.dimension();
        let model = self.model_name();
        let attempts = AtomicU32::new(0);
        let counter = &attempts;

        let schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.policy.initial_interval)
            .with_max_interval(self.policy.max_interval)
            .with_max_elapsed_time(None)
            .build();

        let result = backoff::future::retry(schedule, move || async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let start = Instant::now();

            match self.embedder.embed(text).await {
                Ok(vector) if vector.len() != expected => {
                    metrics::record_embedding(start.elapsed().as_secs_f64(), model, false);
                    Err(backoff::Error::permanent(AppError::EmbeddingError {
                        message: format!(
                            "dimension mismatch: expected {}, got {}",
                            expected,
                            vector.len()
                        ),
                    }))
                }
                Ok(vector) => {
                    metrics::record_embedding(start.elapsed().as_secs_f64(), model, true);
                    debug!(attempt, "Embedding generated");
                    Ok(vector)
                }
                Err(e) => {
                    metrics::record_embedding(start.elapsed().as_secs_f64(), model, false);
                    if e.is_transient() && attempt < max_attempts {
                        warn!(
                            attempt,
                            max_attempts,
                            error = %e,
                            "Embedding request failed, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    } else {
                        Err(backoff::Error::permanent(e))
                    }
                }
            }
        })
        .await;

        result.map_err(|e| AppError::EmbeddingFailure {
            attempts: attempts.load(Ordering::SeqCst),
            message: match e {
                AppError::EmbeddingFailure { message, .. } => message,
                other => other.to_string(),
            },
        })
    }
}
