//! In-memory store adapters
//!
//! Used by the `memory` storage backend and throughout the test suites.

use super::{metadata_contains, RelationalStore, StoreKind, VectorDocument, VectorMatch, VectorStore};
use crate::errors::{AppError, Result};
use crate::records::{matches, FloatRecord, StructuredFilters};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Relational store backed by an ordered map
#[derive(Default)]
pub struct InMemoryRelationalStore {
    rows: RwLock<BTreeMap<String, FloatRecord>>,
}

impl InMemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn query(&self, filters: &StructuredFilters, top_k: usize) -> Result<Vec<FloatRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|record| matches(record, filters))
            .take(top_k)
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: &FloatRecord) -> Result<()> {
        self.rows
            .write()
            .await
            .insert(record.record_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, record_id: &str) -> Result<Option<FloatRecord>> {
        Ok(self.rows.read().await.get(record_id).cloned())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.rows.read().await.keys().cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.read().await.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct VectorEntry {
    vector: Vec<f32>,
    metadata: Map<String, Value>,
    document: String,
}

/// Vector store doing exact L2 search over all entries
pub struct InMemoryVectorStore {
    dimension: usize,
    entries: RwLock<BTreeMap<String, VectorEntry>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(BTreeMap::new()),
        }
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

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x as f64) - (*y as f64);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Map<String, Value>>,
    ) -> Result<Vec<VectorMatch>> {
        self.check_dimension(vector.len())?;
        let entries = self.entries.read().await;

        let mut hits: Vec<VectorMatch> = entries
            .iter()
            .filter(|(_, entry)| filter.map_or(true, |f| metadata_contains(&entry.metadata, f)))
            .map(|(id, entry)| VectorMatch {
                record_id: id.clone(),
                metadata: entry.metadata.clone(),
                document: Some(entry.document.clone()),
                distance: l2_distance(vector, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn filter(&self, filter: &Map<String, Value>, limit: usize) -> Result<Vec<VectorDocument>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(_, entry)| metadata_contains(&entry.metadata, filter))
            .take(limit)
            .map(|(id, entry)| VectorDocument {
                record_id: id.clone(),
                metadata: entry.metadata.clone(),
                document: Some(entry.document.clone()),
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
        self.entries.write().await.insert(
            record_id.to_string(),
            VectorEntry {
                vector,
                metadata,
                document,
            },
        );
        Ok(())
    }

    async fn delete(&self, record_id: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(record_id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{FilterField, Predicate};
    use serde_json::json;

    fn record(id: &str, region: &str) -> FloatRecord {
        let mut r = FloatRecord::new(id);
        r.region = Some(region.to_string());
        r
    }

    #[tokio::test]
    async fn test_relational_upsert_is_idempotent() {
        let store = InMemoryRelationalStore::new();
        store.upsert(&record("a", "Atlantic")).await.unwrap();
        store.upsert(&record("a", "Indian Ocean")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let row = store.get("a").await.unwrap().unwrap();
        assert_eq!(row.region.as_deref(), Some("Indian Ocean"));
    }

    #[tokio::test]
    async fn test_relational_query_filters_and_limits() {
        let store = InMemoryRelationalStore::new();
        for (id, region) in [("a", "North Atlantic"), ("b", "Pacific"), ("c", "South Atlantic")] {
            store.upsert(&record(id, region)).await.unwrap();
        }
        let mut filters = StructuredFilters::new();
        filters.insert(FilterField::Region, Predicate::Contains { value: "atlantic".into() });

        let rows = store.query(&filters, 10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        assert_eq!(store.query(&filters, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_distance() {
        let store = InMemoryVectorStore::new(2);
        let meta = |r: &str| json!({"region": r}).as_object().cloned().unwrap();
        store.upsert("far", vec![5.0, 5.0], meta("Pacific"), "far".into()).await.unwrap();
        store.upsert("near", vec![1.0, 0.0], meta("Atlantic"), "near".into()).await.unwrap();
        store.upsert("mid", vec![2.0, 0.0], meta("Pacific"), "mid".into()).await.unwrap();

        let hits = tokio_test::assert_ok!(store.search(&[0.0, 0.0], 2, None).await);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record_id, "near");
        assert_eq!(hits[0].distance, 1.0);
        assert_eq!(hits[1].record_id, "mid");

        let pacific = meta("Pacific");
        let hits = store.search(&[0.0, 0.0], 5, Some(&pacific)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record_id, "mid");

        let docs = store.filter(&pacific, 10).await.unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn test_vector_dimension_mismatch() {
        let store = InMemoryVectorStore::new(3);
        let err = store
            .upsert("a", vec![1.0], Map::new(), String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store { store: StoreKind::Vector, .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
