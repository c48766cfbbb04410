//! Status and monitoring handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use argoforge_common::{config::StorageBackend, errors::Result};
use argoforge_router::TrackerSnapshot;
use argoforge_sync::{IngestionStats, StorageStats};

const RECENT_QUERIES: usize = 20;

#[derive(Serialize)]
pub struct VectorStatusResponse {
    pub status: &'static str,
    pub backend: StorageBackend,
    pub vector_table: String,
    pub total_documents: u64,
    pub embedding_model: String,
    pub dimension: usize,
}

/// Vector store overview
pub async fn status(State(state): State<AppState>) -> Result<Json<VectorStatusResponse>> {
    let total_documents = state.stores.vector.count().await?;

    Ok(Json(VectorStatusResponse {
        status: "active",
        backend: state.config.storage.backend,
        vector_table: state.config.storage.vector_table.clone(),
        total_documents,
        embedding_model: state.embeddings.model_name().to_string(),
        dimension: state.embeddings.dimension(),
    }))
}

/// Counts in both stores and the last reconcile summary
pub async fn storage(State(state): State<AppState>) -> Result<Json<StorageStats>> {
    Ok(Json(state.sync.storage_stats().await?))
}

/// Adaptive model buckets, recommendations and recent queries
pub async fn performance(State(state): State<AppState>) -> Json<TrackerSnapshot> {
    Json(state.router.tracker().snapshot(RECENT_QUERIES))
}

pub async fn ingestion(State(state): State<AppState>) -> Json<IngestionStats> {
    Json(state.sync.ingestion_stats())
}
