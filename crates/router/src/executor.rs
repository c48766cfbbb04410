//! Strategy executor
//!
//! Runs one [`ExecutionPlan`] against the stores as a small state machine:
//! `Pending -> {SqlRunning | VectorRunning | BothRunning} -> Merging ->
//! {Done | Fallback | Failed}`. Every store call is bounded by its own
//! timeout; an expired call is dropped and its result discarded.
//!
//! Exactly one [`PerformanceRecord`] is emitted per execution, keyed by the
//! planned strategy.

use crate::merger;
use crate::query::{
    Classification, ExecutionPlan, ExecutionState, LegOutcome, LegReport, PerformanceRecord, Query,
    ResultItem, StoreResult, Strategy,
};
use crate::tracker::PerformanceTracker;
use argoforge_common::embeddings::EmbeddingGateway;
use argoforge_common::errors::{AppError, Result};
use argoforge_common::metrics;
use argoforge_common::records::{self, StructuredFilters};
use argoforge_common::stores::{RelationalStore, StoreKind, VectorStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument, warn};

/// Outcome of one executed plan
#[derive(Debug)]
pub struct Execution {
    pub strategy: Strategy,
    pub state: ExecutionState,
    /// Every state visited, starting with `Pending`
    pub trail: Vec<ExecutionState>,
    pub items: Vec<ResultItem>,
    pub legs: Vec<LegReport>,
    /// Stores whose results made it into `items`
    pub answered_by: Vec<StoreKind>,
    pub fallback_used: bool,
    pub total_latency: Duration,
}

pub struct StrategyExecutor {
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingGateway>,
    tracker: Arc<PerformanceTracker>,
}

impl StrategyExecutor {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorStore>,
        embeddings: Arc<EmbeddingGateway>,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            relational,
            vector,
            embeddings,
            tracker,
        }
    }

    /// Execute a plan. Only the failure of every store the plan reached is an error.
    #[instrument(skip(self, query, classification), fields(kind = %classification.kind, strategy = %plan.strategy))]
    pub async fn execute(
        &self,
        query: &Query,
        classification: &Classification,
        plan: ExecutionPlan,
    ) -> Result<Execution> {
        let started = Instant::now();
        let mut trail = vec![ExecutionState::Pending];
        let filters = records::applicable(&records::overlay(
            &classification.extracted_filters,
            query.filters.as_ref(),
        ));
        let top_k = query.top_k;

        let (legs, fallback_used) = match plan.strategy {
            Strategy::SqlOnly => {
                trail.push(ExecutionState::SqlRunning);
                (vec![self.relational_leg(&filters, top_k, plan.sql_timeout).await], false)
            }
            Strategy::VectorOnly => {
                trail.push(ExecutionState::VectorRunning);
                (vec![self.vector_leg(&query.text, top_k, plan.vector_timeout).await], false)
            }
            Strategy::SqlFirst => {
                trail.push(ExecutionState::SqlRunning);
                let primary = self.relational_leg(&filters, top_k, plan.sql_timeout).await;
                if answered(&primary) {
                    (vec![primary], false)
                } else {
                    debug!(outcome = primary.outcome.as_str(), "Relational leg did not answer, falling back");
                    trail.push(ExecutionState::VectorRunning);
                    let fallback = self.vector_leg(&query.text, top_k, plan.vector_timeout).await;
                    (vec![primary, fallback], true)
                }
            }
            Strategy::VectorFirst => {
                trail.push(ExecutionState::VectorRunning);
                let primary = self.vector_leg(&query.text, top_k, plan.vector_timeout).await;
                if answered(&primary) {
                    (vec![primary], false)
                } else {
                    debug!(outcome = primary.outcome.as_str(), "Vector leg did not answer, falling back");
                    trail.push(ExecutionState::SqlRunning);
                    let fallback = self.relational_leg(&filters, top_k, plan.sql_timeout).await;
                    (vec![primary, fallback], true)
                }
            }
            Strategy::Concurrent => {
                trail.push(ExecutionState::BothRunning);
                let (relational, vector) = tokio::join!(
                    self.relational_leg(&filters, top_k, plan.sql_timeout),
                    self.vector_leg(&query.text, top_k, plan.vector_timeout),
                );
                (vec![relational, vector], false)
            }
        };

        trail.push(ExecutionState::Merging);
        let items = merger::merge(&legs, top_k);
        let total_latency = started.elapsed();

        let outcome = primary_outcome(plan.strategy, &legs);
        self.tracker.record(PerformanceRecord::new(
            classification.kind,
            plan.strategy,
            total_latency,
            outcome,
            fallback_used,
        ));

        let any_success = legs.iter().any(StoreResult::is_success);
        let state = if !any_success {
            ExecutionState::Failed
        } else if fallback_used && legs.last().map_or(false, answered) {
            ExecutionState::Fallback
        } else {
            ExecutionState::Done
        };
        trail.push(state);

        metrics::record_query(
            total_latency.as_secs_f64(),
            classification.kind.as_str(),
            plan.strategy.as_str(),
            state_label(state),
            fallback_used,
        );

        if state == ExecutionState::Failed {
            warn!(
                legs = legs.len(),
                latency_ms = total_latency.as_millis() as u64,
                "All stores failed"
            );
            return Err(failure_error(legs));
        }

        let answered_by = answered_by(&legs, &items);
        info!(
            state = state_label(state),
            results = items.len(),
            fallback_used,
            latency_ms = total_latency.as_millis() as u64,
            "Query executed"
        );

        Ok(Execution {
            strategy: plan.strategy,
            state,
            trail,
            items,
            legs: legs.iter().map(StoreResult::report).collect(),
            answered_by,
            fallback_used,
            total_latency,
        })
    }

    /// Relational leg; without predicates it is still one store call, bounded by `top_k`
    async fn relational_leg(&self, filters: &StructuredFilters, top_k: usize, budget: Duration) -> StoreResult {
        let started = Instant::now();

        if filters.is_empty() {
            debug!(top_k, "No applicable predicates, relational leg returns store-native order");
        }

        let result = match timeout(budget, self.relational.query(filters, top_k)).await {
            Ok(Ok(rows)) => {
                let items = rows
                    .into_iter()
                    .enumerate()
                    .map(|(rank, record)| ResultItem {
                        metadata: record.metadata(),
                        record_id: record.record_id,
                        document: None,
                        score: None,
                        distance: None,
                        rank_hint: rank as u32,
                        source: StoreKind::Relational,
                    })
                    .collect();
                StoreResult::success(StoreKind::Relational, items, started.elapsed())
            }
            Ok(Err(e)) => StoreResult::failed(StoreKind::Relational, e, started.elapsed()),
            Err(_) => StoreResult::failed(
                StoreKind::Relational,
                AppError::StoreTimeout {
                    store: StoreKind::Relational,
                    timeout_ms: budget.as_millis() as u64,
                },
                started.elapsed(),
            ),
        };

        observe_leg(&result);
        result
    }

    /// Vector leg; embedding and search share one budget
    async fn vector_leg(&self, text: &str, top_k: usize, budget: Duration) -> StoreResult {
        let started = Instant::now();

        let call = async {
            let embedding = self.embeddings.embed(text).await?;
            self.vector.search(&embedding, top_k, None).await
        };

        let result = match timeout(budget, call).await {
            Ok(Ok(matches)) => {
                let items = matches
                    .into_iter()
                    .enumerate()
                    .map(|(rank, m)| ResultItem {
                        score: Some(m.similarity()),
                        distance: Some(m.distance),
                        record_id: m.record_id,
                        metadata: m.metadata,
                        document: m.document,
                        rank_hint: rank as u32,
                        source: StoreKind::Vector,
                    })
                    .collect();
                StoreResult::success(StoreKind::Vector, items, started.elapsed())
            }
            Ok(Err(e)) => StoreResult::failed(StoreKind::Vector, e, started.elapsed()),
            Err(_) => StoreResult::failed(
                StoreKind::Vector,
                AppError::StoreTimeout {
                    store: StoreKind::Vector,
                    timeout_ms: budget.as_millis() as u64,
                },
                started.elapsed(),
            ),
        };

        observe_leg(&result);
        result
    }
}

/// A leg answers when it succeeded with at least one item
fn answered(leg: &StoreResult) -> bool {
    leg.is_success() && !leg.items.is_empty()
}

/// Outcome recorded for the planned strategy.
///
/// For `Concurrent` any successful leg counts; otherwise the first leg is the primary.
fn primary_outcome(strategy: Strategy, legs: &[StoreResult]) -> LegOutcome {
    if strategy == Strategy::Concurrent && legs.iter().any(StoreResult::is_success) {
        return LegOutcome::Success;
    }
    legs.first().map(|leg| leg.outcome).unwrap_or(LegOutcome::Error)
}

/// Successful legs with at least one item in the merged result; empty when nothing was found
fn answered_by(legs: &[StoreResult], items: &[ResultItem]) -> Vec<StoreKind> {
    legs.iter()
        .filter(|leg| leg.is_success() && items.iter().any(|item| item.source == leg.source))
        .map(|leg| leg.source)
        .collect()
}

/// Error for an execution where no leg succeeded
fn failure_error(legs: Vec<StoreResult>) -> AppError {
    if legs.len() >= 2 {
        let message_for = |kind: StoreKind| {
            legs.iter()
                .find(|leg| leg.source == kind)
                .map(StoreResult::error_message)
                .unwrap_or_default()
        };
        return AppError::BothStoresFailed {
            relational: message_for(StoreKind::Relational),
            vector: message_for(StoreKind::Vector),
        };
    }

    legs.into_iter()
        .next()
        .and_then(|leg| leg.error)
        .unwrap_or_else(|| AppError::Internal {
            message: "execution produced no store result".to_string(),
        })
}

fn observe_leg(leg: &StoreResult) {
    metrics::record_store_call(leg.latency.as_secs_f64(), leg.source.as_str(), leg.outcome.as_str());
    match leg.outcome {
        LegOutcome::Success => debug!(
            store = %leg.source,
            items = leg.items.len(),
            latency_ms = leg.latency.as_millis() as u64,
            "Store leg succeeded"
        ),
        _ => warn!(
            store = %leg.source,
            outcome = leg.outcome.as_str(),
            error = %leg.error_message(),
            latency_ms = leg.latency.as_millis() as u64,
            "Store leg failed"
        ),
    }
}

fn state_label(state: ExecutionState) -> &'static str {
    match state {
        ExecutionState::Done => "done",
        ExecutionState::Fallback => "fallback",
        ExecutionState::Failed => "failed",
        _ => "running",
    }
}
