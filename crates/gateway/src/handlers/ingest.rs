//! Batch ingestion handler

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::AppState;
use argoforge_common::errors::{AppError, Result};
use argoforge_sync::IngestReport;

/// Raw float records to write to both stores
#[derive(Debug, Deserialize)]
pub struct IngestBatchRequest {
    pub data: Vec<Value>,
}

/// Ingest a batch; every record's outcome is reported in the ledger
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(request): Json<IngestBatchRequest>,
) -> Result<Json<IngestReport>> {
    if request.data.is_empty() {
        return Err(AppError::Validation {
            message: "data must contain at least one record".to_string(),
            field: Some("data".to_string()),
        });
    }

    let limit = state.config.server.max_ingest_records;
    if request.data.len() > limit {
        return Err(AppError::PayloadTooLarge {
            size: request.data.len(),
            limit,
        });
    }

    let report = state.sync.ingest(&request.data).await;
    Ok(Json(report))
}
