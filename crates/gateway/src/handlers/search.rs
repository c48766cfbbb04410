//! Search handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;
use validator::Validate;

use super::validate;
use crate::AppState;
use argoforge_common::{errors::Result, stores::VectorDocument};

/// Similarity search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize { 10 }
fn default_filter_limit() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub status: &'static str,
    pub query: String,
    pub results: Vec<SearchResultItem>,
    pub total_searched: u64,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SearchResultItem {
    pub record_id: String,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    pub similarity_score: f64,
    pub distance: f64,
}

/// Metadata filter request
#[derive(Debug, Deserialize, Validate)]
pub struct FilterRequest {
    pub where_filter: Map<String, Value>,

    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_filter_limit")]
    pub limit: usize,
}

#[derive(Serialize)]
pub struct FilterResponse {
    pub status: &'static str,
    pub results: Vec<VectorDocument>,
    pub filter: Map<String, Value>,
    pub count: usize,
}

/// Plain nearest-neighbour search over the vector store
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    validate(&request)?;

    let outcome = state.router.search(&request.query, request.top_k).await?;
    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        results = outcome.matches.len(),
        total_searched = outcome.total_searched,
        latency_ms = processing_time_ms,
        "Search completed"
    );

    Ok(Json(SearchResponse {
        status: "success",
        query: request.query,
        results: outcome
            .matches
            .into_iter()
            .map(|m| SearchResultItem {
                similarity_score: m.similarity(),
                distance: m.distance,
                record_id: m.record_id,
                metadata: m.metadata,
                document: m.document,
            })
            .collect(),
        total_searched: outcome.total_searched,
        processing_time_ms,
    }))
}

/// Vector-store lookup by metadata containment
pub async fn filter_search(
    State(state): State<AppState>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<FilterResponse>> {
    validate(&request)?;

    let results = state.router.filter(&request.where_filter, request.limit).await?;

    Ok(Json(FilterResponse {
        status: "success",
        count: results.len(),
        results,
        filter: request.where_filter,
    }))
}
