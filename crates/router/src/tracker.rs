//! Performance tracker and adaptive strategy model
//!
//! Keeps one statistics bucket per `(kind, strategy)` pair and recommends the
//! strategy with the lowest penalised latency score. This is a fixed EWMA
//! heuristic, not a learned model.

use crate::query::{PerformanceRecord, QueryKind, Strategy};
use argoforge_common::config::RouterConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Running statistics for one `(kind, strategy)` pair
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BucketStats {
    pub observations: u64,
    pub successes: u64,
    pub latency_ewma_ms: f64,
    /// EWMA of failures, where a needed fallback also counts as failure
    pub failure_rate: f64,
    pub last_latency_ms: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl BucketStats {
    fn observe(&mut self, record: &PerformanceRecord, alpha: f64) {
        let failure = if record.is_failure() { 1.0 } else { 0.0 };

        if self.observations == 0 {
            self.latency_ewma_ms = record.latency_ms;
            self.failure_rate = failure;
        } else {
            self.latency_ewma_ms = alpha * record.latency_ms + (1.0 - alpha) * self.latency_ewma_ms;
            self.failure_rate = alpha * failure + (1.0 - alpha) * self.failure_rate;
        }

        self.observations += 1;
        if !record.is_failure() {
            self.successes += 1;
        }
        self.last_latency_ms = record.latency_ms;
        self.last_updated = Some(record.timestamp);
    }

    pub fn score(&self, penalty_factor: f64) -> f64 {
        self.latency_ewma_ms * (1.0 + self.failure_rate * penalty_factor)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub kind: QueryKind,
    pub strategy: Strategy,
    #[serde(flatten)]
    pub stats: BucketStats,
    /// Present once the bucket is eligible for recommendation
    pub score: Option<f64>,
}

/// Point-in-time copy of the tracker
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    pub buckets: Vec<BucketSnapshot>,
    pub recommendations: HashMap<QueryKind, Strategy>,
    pub total_queries: u64,
    pub history_len: usize,
    pub recent: Vec<PerformanceRecord>,
}

pub struct PerformanceTracker {
    buckets: HashMap<(QueryKind, Strategy), Mutex<BucketStats>>,
    history: Mutex<VecDeque<PerformanceRecord>>,
    alpha: f64,
    penalty_factor: f64,
    min_observations: u64,
    history_capacity: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PerformanceTracker {
    /// All buckets are allocated here; the map itself is never mutated afterwards
    pub fn new(config: &RouterConfig) -> Self {
        let buckets = QueryKind::ALL
            .into_iter()
            .flat_map(|kind| Strategy::ALL.into_iter().map(move |strategy| (kind, strategy)))
            .map(|key| (key, Mutex::new(BucketStats::default())))
            .collect();

        Self {
            buckets,
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity.min(4096))),
            alpha: config.ewma_alpha,
            penalty_factor: config.penalty_factor,
            min_observations: config.min_observations,
            history_capacity: config.history_capacity,
        }
    }

    pub fn record(&self, record: PerformanceRecord) {
        if let Some(bucket) = self.buckets.get(&(record.kind, record.strategy)) {
            lock(bucket).observe(&record, self.alpha);
        }

        debug!(
            kind = %record.kind,
            strategy = %record.strategy,
            latency_ms = record.latency_ms,
            outcome = record.outcome.as_str(),
            fallback_used = record.fallback_used,
            "Performance recorded"
        );

        let mut history = lock(&self.history);
        if self.history_capacity > 0 && history.len() >= self.history_capacity {
            history.pop_front();
        }
        if self.history_capacity > 0 {
            history.push_back(record);
        }
    }

    pub fn stats(&self, kind: QueryKind, strategy: Strategy) -> BucketStats {
        self.buckets
            .get(&(kind, strategy))
            .map(|bucket| lock(bucket).clone())
            .unwrap_or_default()
    }

    fn eligible_score(&self, stats: &BucketStats) -> Option<f64> {
        (stats.observations >= self.min_observations.max(1)).then(|| stats.score(self.penalty_factor))
    }

    /// Lowest-scoring eligible candidate, or the kind's default
    pub fn recommend(&self, kind: QueryKind) -> Strategy {
        let mut best: Option<(Strategy, f64)> = None;

        for strategy in Strategy::ADAPTIVE_CANDIDATES {
            let stats = self.stats(kind, strategy);
            if let Some(score) = self.eligible_score(&stats) {
                if best.map_or(true, |(_, best_score)| score < best_score) {
                    best = Some((strategy, score));
                }
            }
        }

        best.map(|(strategy, _)| strategy)
            .unwrap_or_else(|| default_strategy(kind))
    }

    pub fn snapshot(&self, recent_limit: usize) -> TrackerSnapshot {
        let mut buckets: Vec<BucketSnapshot> = self
            .buckets
            .iter()
            .map(|(&(kind, strategy), bucket)| {
                let stats = lock(bucket).clone();
                let score = self.eligible_score(&stats);
                BucketSnapshot {
                    kind,
                    strategy,
                    stats,
                    score,
                }
            })
            .collect();
        buckets.sort_by_key(|b| (b.kind, b.strategy));

        let total_queries = buckets.iter().map(|b| b.stats.observations).sum();
        let recommendations = QueryKind::ALL
            .into_iter()
            .map(|kind| (kind, self.recommend(kind)))
            .collect();

        let history = lock(&self.history);
        let recent = history
            .iter()
            .rev()
            .take(recent_limit)
            .cloned()
            .collect();

        TrackerSnapshot {
            buckets,
            recommendations,
            total_queries,
            history_len: history.len(),
            recent,
        }
    }

    pub fn reset(&self) {
        for bucket in self.buckets.values() {
            *lock(bucket) = BucketStats::default();
        }
        lock(&self.history).clear();
        debug!("Performance statistics reset");
    }
}

/// Strategy used when no candidate has enough observations
pub fn default_strategy(kind: QueryKind) -> Strategy {
    match kind {
        QueryKind::Mixed => Strategy::Concurrent,
        QueryKind::NumericSpatial => Strategy::SqlFirst,
        QueryKind::Semantic => Strategy::VectorFirst,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::LegOutcome;
    use std::sync::Arc;
    use std::time::Duration;

    fn config(min_observations: u64, history_capacity: usize) -> RouterConfig {
        RouterConfig {
            min_observations,
            history_capacity,
            ..RouterConfig::default()
        }
    }

    fn sample(kind: QueryKind, strategy: Strategy, ms: u64, outcome: LegOutcome) -> PerformanceRecord {
        PerformanceRecord::new(kind, strategy, Duration::from_millis(ms), outcome, false)
    }

    #[test]
    fn test_defaults_without_history() {
        let tracker = PerformanceTracker::new(&RouterConfig::default());
        assert_eq!(tracker.recommend(QueryKind::NumericSpatial), Strategy::SqlFirst);
        assert_eq!(tracker.recommend(QueryKind::Semantic), Strategy::VectorFirst);
        assert_eq!(tracker.recommend(QueryKind::Mixed), Strategy::Concurrent);
    }

    #[test]
    fn test_faster_more_reliable_strategy_wins() {
        let tracker = PerformanceTracker::new(&config(5, 100));
        for _ in 0..10 {
            tracker.record(sample(QueryKind::Mixed, Strategy::VectorFirst, 20, LegOutcome::Success));
            tracker.record(sample(QueryKind::Mixed, Strategy::SqlFirst, 80, LegOutcome::Timeout));
            tracker.record(sample(QueryKind::Mixed, Strategy::Concurrent, 90, LegOutcome::Success));
        }
        assert_eq!(tracker.recommend(QueryKind::Mixed), Strategy::VectorFirst);
        // Other kinds untouched
        assert_eq!(tracker.recommend(QueryKind::Semantic), Strategy::VectorFirst);
        assert_eq!(tracker.recommend(QueryKind::NumericSpatial), Strategy::SqlFirst);
    }

    #[test]
    fn test_failure_penalty_outweighs_latency() {
        let tracker = PerformanceTracker::new(&config(3, 100));
        for _ in 0..5 {
            // Fast but always needs the fallback
            tracker.record(PerformanceRecord::new(
                QueryKind::NumericSpatial,
                Strategy::SqlFirst,
                Duration::from_millis(30),
                LegOutcome::Success,
                true,
            ));
            tracker.record(sample(QueryKind::NumericSpatial, Strategy::Concurrent, 60, LegOutcome::Success));
        }
        // 30 * (1 + 1.0 * 4) = 150 > 60
        assert_eq!(tracker.recommend(QueryKind::NumericSpatial), Strategy::Concurrent);
    }

    #[test]
    fn test_min_observations_gate() {
        let tracker = PerformanceTracker::new(&config(5, 100));
        for _ in 0..4 {
            tracker.record(sample(QueryKind::Semantic, Strategy::SqlFirst, 1, LegOutcome::Success));
        }
        assert_eq!(tracker.recommend(QueryKind::Semantic), Strategy::VectorFirst);
        tracker.record(sample(QueryKind::Semantic, Strategy::SqlFirst, 1, LegOutcome::Success));
        assert_eq!(tracker.recommend(QueryKind::Semantic), Strategy::SqlFirst);
    }

    #[test]
    fn test_ewma_seeds_then_smooths() {
        let tracker = PerformanceTracker::new(&RouterConfig::default());
        tracker.record(sample(QueryKind::Mixed, Strategy::Concurrent, 100, LegOutcome::Success));
        tracker.record(sample(QueryKind::Mixed, Strategy::Concurrent, 200, LegOutcome::Error));

        let stats = tracker.stats(QueryKind::Mixed, Strategy::Concurrent);
        assert_eq!(stats.observations, 2);
        assert_eq!(stats.successes, 1);
        assert!((stats.latency_ewma_ms - 120.0).abs() < 1e-9);
        assert!((stats.failure_rate - 0.2).abs() < 1e-9);
        assert_eq!(stats.last_latency_ms, 200.0);
    }

    #[test]
    fn test_history_is_bounded_and_reset_clears() {
        let tracker = PerformanceTracker::new(&config(5, 3));
        for ms in 1..=5 {
            tracker.record(sample(QueryKind::Semantic, Strategy::VectorFirst, ms, LegOutcome::Success));
        }
        let snapshot = tracker.snapshot(10);
        assert_eq!(snapshot.history_len, 3);
        assert_eq!(snapshot.recent[0].latency_ms, 5.0);
        assert_eq!(snapshot.total_queries, 5);
        assert_eq!(snapshot.buckets.len(), 15);

        tracker.reset();
        let snapshot = tracker.snapshot(10);
        assert_eq!(snapshot.history_len, 0);
        assert_eq!(snapshot.total_queries, 0);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let tracker = Arc::new(PerformanceTracker::new(&RouterConfig::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        tracker.record(sample(QueryKind::Mixed, Strategy::Concurrent, 10, LegOutcome::Success));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.stats(QueryKind::Mixed, Strategy::Concurrent).observations, 2000);
    }
}
