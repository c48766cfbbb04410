//! Configuration management for ArgoForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis configuration (embedding cache)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Query router configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Dual-write ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Reconciliation configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Store backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum records accepted by one ingest request
    #[serde(default = "default_max_ingest_records")]
    pub max_ingest_records: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Pool acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Run embedded migrations on startup
    #[serde(default = "default_enabled")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; the embedding cache is disabled when unset
    pub url: Option<String>,

    /// TTL for cached embeddings in seconds
    #[serde(default = "default_redis_ttl")]
    pub embedding_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per text, including the first
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Initial backoff interval in milliseconds
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    /// Upper bound on a single backoff interval in milliseconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Relational leg budget in milliseconds
    #[serde(default = "default_sql_timeout")]
    pub sql_timeout_ms: u64,

    /// Vector leg budget in milliseconds, embedding included
    #[serde(default = "default_vector_timeout")]
    pub vector_timeout_ms: u64,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Smoothing factor for latency and failure EWMAs
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,

    /// Multiplier applied to the failure rate when scoring a strategy
    #[serde(default = "default_penalty_factor")]
    pub penalty_factor: f64,

    /// Observations a strategy needs before it can be recommended
    #[serde(default = "default_min_observations")]
    pub min_observations: u64,

    /// Number of performance records kept for reporting
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,

    /// Records written concurrently within a batch
    #[serde(default = "default_ingest_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Seconds between periodic reconcile runs (0 disables)
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// Consecutive failures before the worker backs off
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// Table holding float embeddings
    #[serde(default = "default_vector_table")]
    pub vector_table: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_max_ingest_records() -> usize { 10_000 }
fn default_database_url() -> String { "postgres://localhost/argoforge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_acquire_timeout() -> u64 { 5 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_ttl() -> u64 { 86_400 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_embedding_timeout() -> u64 { 10 }
fn default_embedding_retries() -> u32 { 3 }
fn default_backoff_initial() -> u64 { 200 }
fn default_backoff_max() -> u64 { 2_000 }
fn default_sql_timeout() -> u64 { 30_000 }
fn default_vector_timeout() -> u64 { 10_000 }
fn default_top_k() -> usize { 10 }
fn default_ewma_alpha() -> f64 { 0.2 }
fn default_penalty_factor() -> f64 { 4.0 }
fn default_min_observations() -> u64 { 5 }
fn default_history_capacity() -> usize { 1_000 }
fn default_ingest_batch_size() -> usize { 100 }
fn default_ingest_concurrency() -> usize { 8 }
fn default_sync_interval() -> u64 { 300 }
fn default_max_consecutive_failures() -> u32 { 10 }
fn default_storage_backend() -> StorageBackend { StorageBackend::Postgres }
fn default_vector_table() -> String { "float_embeddings".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "argoforge".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__ROUTER__SQL_TIMEOUT_MS=5000
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the router and ingest pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.router.ewma_alpha > 0.0 && self.router.ewma_alpha <= 1.0) {
            return Err(ConfigError::Message(format!(
                "router.ewma_alpha must be in (0, 1], got {}",
                self.router.ewma_alpha
            )));
        }
        if self.router.penalty_factor < 0.0 {
            return Err(ConfigError::Message(
                "router.penalty_factor must not be negative".into(),
            ));
        }
        if self.router.sql_timeout_ms == 0 || self.router.vector_timeout_ms == 0 {
            return Err(ConfigError::Message("router timeouts must be positive".into()));
        }
        if self.router.default_top_k == 0 {
            return Err(ConfigError::Message("router.default_top_k must be positive".into()));
        }
        if self.ingest.batch_size == 0 || self.ingest.max_concurrency == 0 {
            return Err(ConfigError::Message(
                "ingest.batch_size and ingest.max_concurrency must be positive".into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Message("embedding.dimension must be positive".into()));
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl RouterConfig {
    pub fn sql_timeout(&self) -> Duration {
        Duration::from_millis(self.sql_timeout_ms)
    }

    pub fn vector_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_ingest_records: default_max_ingest_records(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: default_enabled(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            sql_timeout_ms: default_sql_timeout(),
            vector_timeout_ms: default_vector_timeout(),
            default_top_k: default_top_k(),
            ewma_alpha: default_ewma_alpha(),
            penalty_factor: default_penalty_factor(),
            min_observations: default_min_observations(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch_size(),
            max_concurrency: default_ingest_concurrency(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            vector_table: default_vector_table(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.router.sql_timeout(), Duration::from_secs(30));
        assert_eq!(config.router.vector_timeout(), Duration::from_secs(10));
        assert_eq!(config.ingest.batch_size, 100);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert!(config.redis.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_alpha() {
        let mut config = AppConfig::default();
        config.router.ewma_alpha = 0.0;
        assert!(config.validate().is_err());
        config.router.ewma_alpha = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_deserialize() {
        let config = Config::builder()
            .set_override("storage.backend", "memory")
            .unwrap()
            .set_override("router.min_observations", 2)
            .unwrap()
            .build()
            .unwrap();
        let config: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.router.min_observations, 2);
        assert_eq!(config.router.history_capacity, 1_000);
    }
}
