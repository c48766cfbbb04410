//! Optimized (routed) query handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validate;
use crate::AppState;
use argoforge_common::{errors::Result, records::StructuredFilters, stores::StoreKind};
use argoforge_router::{
    executor::Execution,
    query::LegReport,
    Notice, Query, ResultItem, RoutedResponse, Strategy,
};

/// Routed query request
#[derive(Debug, Deserialize, Validate)]
pub struct OptimizedQueryRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// `adaptive` (default) or an explicit strategy name
    #[serde(default)]
    pub strategy: Option<String>,

    #[validate(range(min = 1, max = 100))]
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Explicit predicates; they override extracted ones per field
    #[serde(default)]
    pub filters: Option<StructuredFilters>,
}

#[derive(Serialize)]
pub struct OptimizedQueryResponse {
    /// `success` or `no_results`
    pub status: &'static str,
    pub query: String,
    pub strategy_used: Strategy,
    pub adaptive: bool,
    /// `relational`, `vector`, `both` or `none`
    pub source: &'static str,
    pub results: Vec<ResultItem>,
    pub query_type: String,
    pub confidence: f64,
    pub extracted_filters: StructuredFilters,
    pub fallback_used: bool,
    pub total_time_ms: f64,
    pub store_status: StoreStatus,
    pub notices: Vec<Notice>,
}

#[derive(Serialize)]
pub struct StoreStatus {
    pub state: String,
    pub trail: Vec<String>,
    pub legs: Vec<LegReport>,
}

fn source_label(execution: &Execution) -> &'static str {
    let relational = execution.answered_by.contains(&StoreKind::Relational);
    let vector = execution.answered_by.contains(&StoreKind::Vector);
    match (relational, vector) {
        (true, true) => "both",
        (true, false) => "relational",
        (false, true) => "vector",
        (false, false) => "none",
    }
}

fn state_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

impl From<RoutedResponse> for OptimizedQueryResponse {
    fn from(routed: RoutedResponse) -> Self {
        let execution = routed.execution;
        let source = source_label(&execution);

        OptimizedQueryResponse {
            status: if execution.items.is_empty() { "no_results" } else { "success" },
            query: routed.query,
            strategy_used: execution.strategy,
            adaptive: routed.adaptive,
            source,
            query_type: routed.classification.kind.to_string(),
            confidence: routed.classification.confidence,
            extracted_filters: routed.classification.extracted_filters,
            fallback_used: execution.fallback_used,
            total_time_ms: execution.total_latency.as_secs_f64() * 1000.0,
            store_status: StoreStatus {
                state: state_name(&execution.state),
                trail: execution.trail.iter().map(state_name).collect(),
                legs: execution.legs,
            },
            results: execution.items,
            notices: routed.notices,
        }
    }
}

/// Classify, route and execute a query
pub async fn optimized_query(
    State(state): State<AppState>,
    Json(request): Json<OptimizedQueryRequest>,
) -> Result<Json<OptimizedQueryResponse>> {
    validate(&request)?;

    let strategy = Strategy::parse_requested(request.strategy.as_deref())?;
    let top_k = request.top_k.unwrap_or(state.router.config().default_top_k);

    let mut query = Query::new(request.query, top_k);
    if let Some(strategy) = strategy {
        query = query.with_strategy(strategy);
    }
    if let Some(filters) = request.filters {
        query = query.with_filters(filters);
    }

    let routed = state.router.route(query).await?;

    tracing::info!(
        query_type = %routed.classification.kind,
        strategy = %routed.execution.strategy,
        results = routed.execution.items.len(),
        fallback_used = routed.execution.fallback_used,
        "Optimized query completed"
    );

    Ok(Json(routed.into()))
}
