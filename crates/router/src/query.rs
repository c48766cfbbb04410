//! Query, plan and result types shared by the router components

use argoforge_common::errors::{AppError, ErrorCode};
use argoforge_common::records::StructuredFilters;
use argoforge_common::stores::StoreKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Shape of a query as judged by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    NumericSpatial,
    Semantic,
    Mixed,
}

impl QueryKind {
    pub const ALL: [QueryKind; 3] = [QueryKind::NumericSpatial, QueryKind::Semantic, QueryKind::Mixed];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::NumericSpatial => "numeric_spatial",
            QueryKind::Semantic => "semantic",
            QueryKind::Mixed => "mixed",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution strategy; one executor handler per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    SqlFirst,
    VectorFirst,
    Concurrent,
    SqlOnly,
    VectorOnly,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::SqlFirst,
        Strategy::VectorFirst,
        Strategy::Concurrent,
        Strategy::SqlOnly,
        Strategy::VectorOnly,
    ];

    /// Strategies the adaptive model chooses between, in tie-break order
    pub const ADAPTIVE_CANDIDATES: [Strategy; 3] =
        [Strategy::SqlFirst, Strategy::VectorFirst, Strategy::Concurrent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SqlFirst => "sql_first",
            Strategy::VectorFirst => "vector_first",
            Strategy::Concurrent => "concurrent",
            Strategy::SqlOnly => "sql_only",
            Strategy::VectorOnly => "vector_only",
        }
    }

    /// Parse a requested strategy; `adaptive` (or nothing) maps to `None`
    pub fn parse_requested(value: Option<&str>) -> Result<Option<Strategy>, AppError> {
        match value.map(str::trim) {
            None | Some("") | Some("adaptive") => Ok(None),
            Some(other) => other.parse().map(Some),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| AppError::Validation {
                message: format!(
                    "Unknown strategy '{}', expected adaptive, sql_first, vector_first, concurrent, sql_only or vector_only",
                    s
                ),
                field: Some("strategy".to_string()),
            })
    }
}

/// A routed query; immutable once built
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    /// `None` lets the adaptive model choose
    pub strategy: Option<Strategy>,
    pub top_k: usize,
    pub filters: Option<StructuredFilters>,
}

impl Query {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            strategy: None,
            top_k,
            filters: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_filters(mut self, filters: StructuredFilters) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// Classifier verdict for one query text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub kind: QueryKind,
    pub extracted_filters: StructuredFilters,
    pub confidence: f64,
}

/// Chosen strategy plus per-store budgets.
///
/// Not `Clone`: the executor takes it by value and consumes it once.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub strategy: Strategy,
    pub sql_timeout: Duration,
    pub vector_timeout: Duration,
}

/// Outcome of a single store leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegOutcome {
    Success,
    Timeout,
    Error,
}

impl LegOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegOutcome::Success => "success",
            LegOutcome::Timeout => "timeout",
            LegOutcome::Error => "error",
        }
    }
}

/// One ranked hit from either store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub record_id: String,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    /// Similarity in (0, 1]; `None` for exact relational matches
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Position in the store's native order
    pub rank_hint: u32,
    pub source: StoreKind,
}

/// Result of one store call
#[derive(Debug)]
pub struct StoreResult {
    pub source: StoreKind,
    pub items: Vec<ResultItem>,
    pub latency: Duration,
    pub outcome: LegOutcome,
    pub error: Option<AppError>,
}

impl StoreResult {
    pub fn success(source: StoreKind, items: Vec<ResultItem>, latency: Duration) -> Self {
        Self {
            source,
            items,
            latency,
            outcome: LegOutcome::Success,
            error: None,
        }
    }

    /// A failed leg; store timeouts from the adapter count as `Timeout`
    pub fn failed(source: StoreKind, error: AppError, latency: Duration) -> Self {
        let outcome = match error {
            AppError::StoreTimeout { .. } => LegOutcome::Timeout,
            _ => LegOutcome::Error,
        };
        Self {
            source,
            items: Vec::new(),
            latency,
            outcome,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == LegOutcome::Success
    }

    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| self.outcome.as_str().to_string())
    }

    pub fn report(&self) -> LegReport {
        LegReport {
            source: self.source,
            outcome: self.outcome,
            latency_ms: self.latency.as_secs_f64() * 1000.0,
            items: self.items.len(),
            error_code: self.error.as_ref().map(|e| e.code()),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Serializable summary of a store leg
#[derive(Debug, Clone, Serialize)]
pub struct LegReport {
    pub source: StoreKind,
    pub outcome: LegOutcome,
    pub latency_ms: f64,
    pub items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Executor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    SqlRunning,
    VectorRunning,
    BothRunning,
    Merging,
    Done,
    Fallback,
    Failed,
}

/// One observation for the adaptive model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub kind: QueryKind,
    /// The initially planned strategy, never the fallback target
    pub strategy: Strategy,
    pub latency_ms: f64,
    pub outcome: LegOutcome,
    pub fallback_used: bool,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn new(
        kind: QueryKind,
        strategy: Strategy,
        latency: Duration,
        outcome: LegOutcome,
        fallback_used: bool,
    ) -> Self {
        Self {
            kind,
            strategy,
            latency_ms: latency.as_secs_f64() * 1000.0,
            outcome,
            fallback_used,
            timestamp: Utc::now(),
        }
    }

    /// Failure for scoring purposes: a failed primary or a needed fallback
    pub fn is_failure(&self) -> bool {
        self.outcome != LegOutcome::Success || self.fallback_used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requested_strategy() {
        assert_eq!(Strategy::parse_requested(None).unwrap(), None);
        assert_eq!(Strategy::parse_requested(Some("adaptive")).unwrap(), None);
        assert_eq!(
            Strategy::parse_requested(Some("vector_only")).unwrap(),
            Some(Strategy::VectorOnly)
        );
        let err = Strategy::parse_requested(Some("fastest")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_failed_leg_outcome_from_error() {
        let leg = StoreResult::failed(
            StoreKind::Vector,
            AppError::StoreTimeout { store: StoreKind::Vector, timeout_ms: 10 },
            Duration::from_millis(10),
        );
        assert_eq!(leg.outcome, LegOutcome::Timeout);

        let leg = StoreResult::failed(
            StoreKind::Vector,
            AppError::EmbeddingFailure { attempts: 3, message: "down".into() },
            Duration::from_millis(10),
        );
        assert_eq!(leg.outcome, LegOutcome::Error);
        assert_eq!(leg.report().error_code, Some(ErrorCode::EmbeddingError));
    }

    #[test]
    fn test_performance_record_failure() {
        let ok = PerformanceRecord::new(
            QueryKind::Semantic,
            Strategy::VectorFirst,
            Duration::from_millis(5),
            LegOutcome::Success,
            false,
        );
        assert!(!ok.is_failure());
        assert_eq!(ok.latency_ms, 5.0);

        let fallback = PerformanceRecord { fallback_used: true, ..ok };
        assert!(fallback.is_failure());
    }
}
