//! Maintenance handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use argoforge_common::errors::Result;
use argoforge_sync::SyncReport;

#[derive(Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Run one reconcile pass now
pub async fn sync(State(state): State<AppState>) -> Result<Json<SyncReport>> {
    Ok(Json(state.sync.reconcile().await?))
}

/// Clear the adaptive model and the ingestion counters
pub async fn reset_stats(State(state): State<AppState>) -> Json<ResetResponse> {
    state.router.reset_stats();
    state.sync.reset_ingestion_stats();
    Json(ResetResponse {
        status: "success",
        message: "Query performance and ingestion statistics reset",
    })
}
