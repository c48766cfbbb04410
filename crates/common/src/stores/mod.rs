//! Store capability traits
//!
//! The router and the consistency manager only see these traits. Postgres
//! adapters live in [`crate::db`]; in-memory adapters in [`memory`].

pub mod memory;

pub use memory::{InMemoryRelationalStore, InMemoryVectorStore};

use crate::config::{AppConfig, StorageBackend};
use crate::db::{DbPool, FloatRepository, PgVectorStore};
use crate::errors::Result;
use crate::records::{FloatRecord, StructuredFilters};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Which of the two stores an operation ran against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Relational,
    Vector,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Relational => "relational",
            StoreKind::Vector => "vector",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nearest-neighbour hit from the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub record_id: String,
    pub metadata: Map<String, Value>,
    pub document: Option<String>,
    /// L2 distance, lower is closer
    pub distance: f64,
}

impl VectorMatch {
    pub fn similarity(&self) -> f64 {
        similarity_from_distance(self.distance)
    }
}

pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Vector store entry returned by metadata-only lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub record_id: String,
    pub metadata: Map<String, Value>,
    pub document: Option<String>,
}

/// Exact-predicate store holding the authoritative float payload
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Rows matching every applicable predicate, in store-native order
    async fn query(&self, filters: &StructuredFilters, top_k: usize) -> Result<Vec<FloatRecord>>;

    /// Insert or replace by `record_id`
    async fn upsert(&self, record: &FloatRecord) -> Result<()>;

    async fn get(&self, record_id: &str) -> Result<Option<FloatRecord>>;

    async fn list_ids(&self) -> Result<Vec<String>>;

    async fn count(&self) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

/// Similarity store keyed by `record_id`
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Nearest neighbours by ascending distance, optionally restricted by metadata containment
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Map<String, Value>>,
    ) -> Result<Vec<VectorMatch>>;

    /// Entries whose metadata contains every key/value of `filter`
    async fn filter(&self, filter: &Map<String, Value>, limit: usize) -> Result<Vec<VectorDocument>>;

    /// Insert or replace by `record_id`
    async fn upsert(
        &self,
        record_id: &str,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
        document: String,
    ) -> Result<()>;

    async fn delete(&self, record_id: &str) -> Result<bool>;

    async fn list_ids(&self) -> Result<Vec<String>>;

    async fn count(&self) -> Result<u64>;
}

/// Both store handles, built once at startup
#[derive(Clone)]
pub struct StoreSet {
    pub relational: Arc<dyn RelationalStore>,
    pub vector: Arc<dyn VectorStore>,
}

impl StoreSet {
    /// Connect the configured backend, running migrations for Postgres when enabled
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory stores");
                Ok(Self::in_memory(config.embedding.dimension))
            }
            StorageBackend::Postgres => {
                let pool = DbPool::new(&config.database).await?;
                if config.database.run_migrations {
                    pool.migrate().await?;
                }
                let acquire_timeout_ms = config.database.acquire_timeout_secs * 1000;
                let vector = PgVectorStore::new(
                    pool.sqlx_pool().clone(),
                    config.storage.vector_table.clone(),
                    config.embedding.dimension,
                    acquire_timeout_ms,
                )?;
                let relational = FloatRepository::new(pool, acquire_timeout_ms);
                Ok(Self {
                    relational: Arc::new(relational),
                    vector: Arc::new(vector),
                })
            }
        }
    }

    pub fn in_memory(dimension: usize) -> Self {
        Self {
            relational: Arc::new(InMemoryRelationalStore::new()),
            vector: Arc::new(InMemoryVectorStore::new(dimension)),
        }
    }
}

/// JSONB-style containment: every key of `filter` is present with an equal value
pub fn metadata_contains(metadata: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key).map_or(false, |actual| actual == expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_similarity_from_distance() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(1.0), 0.5);
        assert!(similarity_from_distance(3.0) < similarity_from_distance(1.0));
    }

    #[test]
    fn test_metadata_contains() {
        let meta = json!({"region": "Indian Ocean", "lat": -10.0}).as_object().cloned().unwrap();
        let hit = json!({"region": "Indian Ocean"}).as_object().cloned().unwrap();
        let miss = json!({"region": "Atlantic"}).as_object().cloned().unwrap();
        assert!(metadata_contains(&meta, &hit));
        assert!(!metadata_contains(&meta, &miss));
        assert!(metadata_contains(&meta, &Map::new()));
    }
}
