//! pgvector similarity store
//!
//! Raw sqlx queries over the `float_embeddings` table. Distances are L2
//! (`<->`), metadata filters use JSONB containment (`@>`).

use crate::errors::{AppError, Result};
use crate::stores::{StoreKind, VectorDocument, VectorMatch, VectorStore};
use async_trait::async_trait;
use pgvector::Vector;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::{debug, instrument};

/// Vector store backed by pgvector
#[derive(Clone)]
pub struct PgVectorStore {
    pool: PgPool,
    table: String,
    dimension: usize,
    acquire_timeout_ms: u64,
}

impl PgVectorStore {
    pub fn new(
        pool: PgPool,
        table: impl Into<String>,
        dimension: usize,
        acquire_timeout_ms: u64,
    ) -> Result<Self> {
        let table = table.into();
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(AppError::Configuration {
                message: format!("Invalid vector table name '{}'", table),
            });
        }
        Ok(Self {
            pool,
            table,
            dimension,
            acquire_timeout_ms,
        })
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(AppError::Store {
                store: StoreKind::Vector,
                message: format!("expected {} dimensions, got {}", self.dimension, len),
            });
        }
        Ok(())
    }
}

fn map_sqlx_err(err: sqlx::Error, acquire_timeout_ms: u64) -> AppError {
    match err {
        sqlx::Error::PoolTimedOut => AppError::StoreTimeout {
            store: StoreKind::Vector,
            timeout_ms: acquire_timeout_ms,
        },
        other => AppError::Store {
            store: StoreKind::Vector,
            message: other.to_string(),
        },
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[instrument(skip(self, vector, filter), fields(table = %self.table))]
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Map<String, Value>>,
    ) -> Result<Vec<VectorMatch>> {
        self.check_dimension(vector.len())?;

        let sql = format!(
            r#"
            SELECT record_id, metadata, document, (embedding <-> $1)::float8 AS distance
            FROM {}
            WHERE metadata @> $2
            ORDER BY embedding <-> $1, record_id
            LIMIT $3
            "#,
            self.table
        );

        let filter = Value::Object(filter.cloned().unwrap_or_default());

        let rows = sqlx::query_as::<_, (String, Value, Option<String>, f64)>(&sql)
            .bind(Vector::from(vector.to_vec()))
            .bind(filter)
            .bind(top_k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, self.acquire_timeout_ms))?;

        debug!(hits = rows.len(), "Vector search complete");

        Ok(rows
            .into_iter()
            .map(|(record_id, metadata, document, distance)| VectorMatch {
                record_id,
                metadata: into_map(metadata),
                document,
                distance,
            })
            .collect())
    }

    async fn filter(&self, filter: &Map<String, Value>, limit: usize) -> Result<Vec<VectorDocument>> {
        let sql = format!(
            "SELECT record_id, metadata, document FROM {} WHERE metadata @> $1 ORDER BY record_id LIMIT $2",
            self.table
        );

        let rows = sqlx::query_as::<_, (String, Value, Option<String>)>(&sql)
            .bind(Value::Object(filter.clone()))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, self.acquire_timeout_ms))?;

        Ok(rows
            .into_iter()
            .map(|(record_id, metadata, document)| VectorDocument {
                record_id,
                metadata: into_map(metadata),
                document,
            })
            .collect())
    }

    async fn upsert(
        &self,
        record_id: &str,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
        document: String,
    ) -> Result<()> {
        self.check_dimension(vector.len())?;

        let sql = format!(
            r#"
            INSERT INTO {} (record_id, embedding, metadata, document, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (record_id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                metadata = EXCLUDED.metadata,
                document = EXCLUDED.document,
                updated_at = NOW()
            "#,
            self.table
        );

        sqlx::query(&sql)
            .bind(record_id)
            .bind(Vector::from(vector))
            .bind(Value::Object(metadata))
            .bind(document)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, self.acquire_timeout_ms))?;

        Ok(())
    }

    async fn delete(&self, record_id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE record_id = $1", self.table);
        let result = sqlx::query(&sql)
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, self.acquire_timeout_ms))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT record_id FROM {} ORDER BY record_id", self.table);
        sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, self.acquire_timeout_ms))
    }

    async fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(e, self.acquire_timeout_ms))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_maps_to_store_timeout() {
        assert!(matches!(
            map_sqlx_err(sqlx::Error::PoolTimedOut, 5000),
            AppError::StoreTimeout { store: StoreKind::Vector, timeout_ms: 5000 }
        ));
        assert!(matches!(
            map_sqlx_err(sqlx::Error::RowNotFound, 5000),
            AppError::Store { store: StoreKind::Vector, .. }
        ));
    }

    #[test]
    fn test_into_map_non_object() {
        assert!(into_map(Value::Null).is_empty());
        assert_eq!(into_map(serde_json::json!({"a": 1})).len(), 1);
    }
}
