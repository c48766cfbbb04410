//! ArgoForge adaptive query router
//!
//! Classifies a query, picks a strategy (explicit or from the adaptive
//! model), runs it against the relational and vector stores and merges the
//! results.
//!
//! ```text
//! query -> classifier -> tracker.recommend -> executor -> merger -> response
//!                              ^                   |
//!                              +---- record -------+
//! ```

pub mod classifier;
pub mod executor;
pub mod merger;
pub mod query;
pub mod tracker;

pub use classifier::classify;
pub use executor::{Execution, StrategyExecutor};
pub use query::{
    Classification, ExecutionPlan, ExecutionState, LegOutcome, Query, QueryKind, ResultItem, Strategy,
};
pub use tracker::{PerformanceTracker, TrackerSnapshot};

use argoforge_common::config::RouterConfig;
use argoforge_common::embeddings::EmbeddingGateway;
use argoforge_common::errors::{AppError, ErrorCode, Result};
use argoforge_common::metrics;
use argoforge_common::stores::{StoreKind, StoreSet, VectorDocument, VectorMatch, VectorStore};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info};

/// Non-fatal condition reported alongside a response
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub code: ErrorCode,
    pub message: String,
}

/// Everything the caller needs to render a routed query
#[derive(Debug)]
pub struct RoutedResponse {
    pub query: String,
    pub classification: Classification,
    /// Whether the adaptive model picked the strategy
    pub adaptive: bool,
    pub execution: Execution,
    pub notices: Vec<Notice>,
}

/// Result of a direct similarity search
#[derive(Debug)]
pub struct SearchOutcome {
    pub matches: Vec<VectorMatch>,
    pub total_searched: u64,
}

pub struct QueryRouter {
    executor: StrategyExecutor,
    tracker: Arc<PerformanceTracker>,
    vector: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingGateway>,
    config: RouterConfig,
}

impl QueryRouter {
    pub fn new(stores: StoreSet, embeddings: Arc<EmbeddingGateway>, config: RouterConfig) -> Self {
        let tracker = Arc::new(PerformanceTracker::new(&config));
        let executor = StrategyExecutor::new(
            stores.relational,
            stores.vector.clone(),
            embeddings.clone(),
            tracker.clone(),
        );
        Self {
            executor,
            tracker,
            vector: stores.vector,
            embeddings,
            config,
        }
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Build the plan for a classified query
    pub fn plan(&self, query: &Query, classification: &Classification) -> ExecutionPlan {
        let strategy = query
            .strategy
            .unwrap_or_else(|| self.tracker.recommend(classification.kind));
        ExecutionPlan {
            strategy,
            sql_timeout: self.config.sql_timeout(),
            vector_timeout: self.config.vector_timeout(),
        }
    }

    /// Classify, plan and execute one query
    pub async fn route(&self, query: Query) -> Result<RoutedResponse> {
        validate(&query)?;

        let classification = classify(&query.text);
        let plan = self.plan(&query, &classification);
        let adaptive = query.strategy.is_none();

        let mut notices = Vec::new();
        if classification.kind == QueryKind::Mixed {
            notices.push(Notice {
                code: ErrorCode::ClassificationAmbiguous,
                message: format!(
                    "Query matched {} markers; treated as mixed",
                    if classification.confidence > 0.0 { "both structured and semantic" } else { "no" }
                ),
            });
        }

        debug!(
            kind = %classification.kind,
            confidence = classification.confidence,
            filters = classification.extracted_filters.len(),
            strategy = %plan.strategy,
            adaptive,
            "Query planned"
        );

        let execution = self.executor.execute(&query, &classification, plan).await?;

        Ok(RoutedResponse {
            query: query.text,
            classification,
            adaptive,
            execution,
            notices,
        })
    }

    /// Plain nearest-neighbour search, bounded by the vector timeout
    pub async fn search(&self, text: &str, top_k: usize) -> Result<SearchOutcome> {
        if text.trim().is_empty() {
            return Err(AppError::MissingField {
                field: "query".to_string(),
            });
        }
        if top_k == 0 {
            return Err(invalid_top_k());
        }

        let started = Instant::now();
        let budget = self.config.vector_timeout();
        let call = async {
            let embedding = self.embeddings.embed(text).await?;
            let matches = self.vector.search(&embedding, top_k, None).await?;
            let total_searched = self.vector.count().await?;
            Ok::<_, AppError>(SearchOutcome {
                matches,
                total_searched,
            })
        };

        let result = match timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StoreTimeout {
                store: StoreKind::Vector,
                timeout_ms: budget.as_millis() as u64,
            }),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(AppError::StoreTimeout { .. }) => "timeout",
            Err(_) => "error",
        };
        metrics::record_store_call(started.elapsed().as_secs_f64(), StoreKind::Vector.as_str(), outcome);
        result
    }

    /// Metadata-only lookup in the vector store
    pub async fn filter(&self, filter: &Map<String, Value>, limit: usize) -> Result<Vec<VectorDocument>> {
        if filter.is_empty() {
            return Err(AppError::Validation {
                message: "where_filter must contain at least one key".to_string(),
                field: Some("where_filter".to_string()),
            });
        }
        self.vector.filter(filter, limit).await
    }

    /// Clear every performance bucket and the history
    pub fn reset_stats(&self) {
        self.tracker.reset();
        info!("Router performance statistics reset");
    }
}

fn invalid_top_k() -> AppError {
    AppError::Validation {
        message: "top_k must be greater than zero".to_string(),
        field: Some("top_k".to_string()),
    }
}

fn validate(query: &Query) -> Result<()> {
    if query.text.trim().is_empty() {
        return Err(AppError::MissingField {
            field: "query".to_string(),
        });
    }
    if query.top_k == 0 {
        return Err(invalid_top_k());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argoforge_common::embeddings::{MockEmbedder, RetryPolicy};
    use argoforge_common::records::FloatRecord;
    use argoforge_common::stores::RelationalStore;
    use chrono::NaiveDate;

    const DIM: usize = 16;

    async fn seeded_router() -> QueryRouter {
        let stores = StoreSet::in_memory(DIM);
        let embeddings = Arc::new(EmbeddingGateway::new(
            Arc::new(MockEmbedder::new(DIM)),
            RetryPolicy::default(),
        ));

        let mut record = FloatRecord::new("2902746");
        record.deploy_date = NaiveDate::from_ymd_opt(2023, 4, 2);
        record.region = Some("North Atlantic".into());
        record.description = Some("Deep ocean climate research float".into());
        stores.relational.upsert(&record).await.unwrap();
        let vector = embeddings.embed(&record.embedding_text()).await.unwrap();
        stores
            .vector
            .upsert(&record.record_id, vector, record.metadata(), record.embedding_text())
            .await
            .unwrap();

        QueryRouter::new(stores, embeddings, RouterConfig::default())
    }

    #[tokio::test]
    async fn test_numeric_query_routes_sql_first() {
        let router = seeded_router().await;
        let response = router
            .route(Query::new("show me all floats deployed in 2023", 10))
            .await
            .unwrap();

        assert_eq!(response.classification.kind, QueryKind::NumericSpatial);
        assert!(response.adaptive);
        assert_eq!(response.execution.strategy, Strategy::SqlFirst);
        assert_eq!(response.execution.state, ExecutionState::Done);
        assert_eq!(response.execution.items[0].record_id, "2902746");
        assert!(response.notices.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_query_routes_vector_first() {
        let router = seeded_router().await;
        let response = router
            .route(Query::new("floats similar to deep ocean climate research floats", 5))
            .await
            .unwrap();

        assert_eq!(response.classification.kind, QueryKind::Semantic);
        assert_eq!(response.execution.strategy, Strategy::VectorFirst);
        assert_eq!(response.execution.answered_by, vec![StoreKind::Vector]);
        assert!(response.execution.items[0].score.is_some());
    }

    #[tokio::test]
    async fn test_explicit_strategy_and_ambiguity_notice() {
        let router = seeded_router().await;
        let response = router
            .route(Query::new("hello there", 5).with_strategy(Strategy::Concurrent))
            .await
            .unwrap();

        assert!(!response.adaptive);
        assert_eq!(response.execution.strategy, Strategy::Concurrent);
        assert_eq!(response.notices.len(), 1);
        assert_eq!(response.notices[0].code, ErrorCode::ClassificationAmbiguous);
        assert_eq!(router.tracker().snapshot(10).total_queries, 1);

        router.reset_stats();
        assert_eq!(router.tracker().snapshot(10).total_queries, 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_queries() {
        let router = seeded_router().await;
        let err = router.route(Query::new("   ", 5)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingField);

        let err = router.route(Query::new("floats", 0)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_search_and_filter() {
        let router = seeded_router().await;
        let outcome = tokio_test::assert_ok!(router.search("climate research", 3).await);
        assert_eq!(outcome.total_searched, 1);
        assert_eq!(outcome.matches.len(), 1);

        let mut filter = Map::new();
        filter.insert("region".into(), Value::String("North Atlantic".into()));
        let docs = tokio_test::assert_ok!(router.filter(&filter, 10).await);
        assert_eq!(docs.len(), 1);
        assert!(router.filter(&Map::new(), 10).await.is_err());
    }
}
