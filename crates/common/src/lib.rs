//! ArgoForge Common Library
//!
//! Shared code for the ArgoForge services including:
//! - Float record model and structured filters
//! - Store capability traits with Postgres, pgvector and in-memory adapters
//! - Embedding providers and the retrying embedding gateway
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod records;
pub mod stores;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::{Embedder, EmbeddingGateway};
pub use errors::{AppError, ErrorCode, Result};
pub use records::{FilterField, FloatRecord, Predicate, StructuredFilters};
pub use stores::{RelationalStore, StoreKind, VectorStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
