//! Result merging
//!
//! Combines the successful legs of one execution into a single ranked list.
//! Exact relational matches come first in store order, then similarity hits.

use crate::query::{ResultItem, StoreResult};
use argoforge_common::stores::StoreKind;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Merge successful store results into at most `top_k` items
pub fn merge(results: &[StoreResult], top_k: usize) -> Vec<ResultItem> {
    let mut by_id: HashMap<&str, &ResultItem> = HashMap::new();

    for item in results
        .iter()
        .filter(|r| r.is_success())
        .flat_map(|r| r.items.iter())
    {
        match by_id.get(item.record_id.as_str()) {
            Some(existing) if !prefers(item, existing) => {}
            _ => {
                by_id.insert(item.record_id.as_str(), item);
            }
        }
    }

    let (mut exact, mut scored): (Vec<&ResultItem>, Vec<&ResultItem>) =
        by_id.into_values().partition(|item| item.score.is_none());

    exact.sort_by(|a, b| {
        a.rank_hint
            .cmp(&b.rank_hint)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    scored.sort_by(|a, b| {
        let sa = a.score.unwrap_or(0.0);
        let sb = b.score.unwrap_or(0.0);
        sb.partial_cmp(&sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });

    exact
        .into_iter()
        .chain(scored)
        .take(top_k)
        .cloned()
        .collect()
}

/// Whether `candidate` should replace `existing` for the same record id
fn prefers(candidate: &ResultItem, existing: &ResultItem) -> bool {
    match (candidate.source, existing.source) {
        (StoreKind::Relational, StoreKind::Vector) => true,
        (StoreKind::Vector, StoreKind::Relational) => false,
        _ => match (candidate.score, existing.score) {
            (Some(c), Some(e)) => c > e,
            (None, Some(_)) => true,
            _ => candidate.rank_hint < existing.rank_hint,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argoforge_common::errors::AppError;
    use serde_json::{json, Map};
    use std::time::Duration;

    fn exact(id: &str, rank: u32) -> ResultItem {
        ResultItem {
            record_id: id.into(),
            metadata: json!({"record_id": id, "from": "relational"}).as_object().cloned().unwrap(),
            document: None,
            score: None,
            distance: None,
            rank_hint: rank,
            source: StoreKind::Relational,
        }
    }

    fn similar(id: &str, score: f64, rank: u32) -> ResultItem {
        ResultItem {
            record_id: id.into(),
            metadata: Map::new(),
            document: Some(format!("Float ID: {}", id)),
            score: Some(score),
            distance: Some(1.0 / score - 1.0),
            rank_hint: rank,
            source: StoreKind::Vector,
        }
    }

    fn ok(source: StoreKind, items: Vec<ResultItem>) -> StoreResult {
        StoreResult::success(source, items, Duration::from_millis(1))
    }

    #[test]
    fn test_exact_rows_precede_scored_hits() {
        let merged = merge(
            &[
                ok(StoreKind::Vector, vec![similar("b", 0.9, 0), similar("c", 0.8, 1)]),
                ok(StoreKind::Relational, vec![exact("z", 0), exact("a", 1)]),
            ],
            10,
        );
        let ids: Vec<_> = merged.iter().map(|i| i.record_id.as_str()).collect();
        assert_eq!(ids, ["z", "a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_keeps_relational_entry() {
        let merged = merge(
            &[
                ok(StoreKind::Vector, vec![similar("x", 0.99, 0)]),
                ok(StoreKind::Relational, vec![exact("x", 0)]),
            ],
            10,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, StoreKind::Relational);
        assert_eq!(merged[0].metadata["from"], "relational");
        assert!(merged[0].score.is_none());
    }

    #[test]
    fn test_score_ties_break_by_record_id() {
        let merged = merge(
            &[ok(
                StoreKind::Vector,
                vec![similar("m", 0.5, 0), similar("d", 0.5, 1), similar("q", 0.7, 2)],
            )],
            10,
        );
        let ids: Vec<_> = merged.iter().map(|i| i.record_id.as_str()).collect();
        assert_eq!(ids, ["q", "d", "m"]);
    }

    #[test]
    fn test_failed_legs_are_ignored_and_top_k_applies() {
        let mut failed = StoreResult::failed(
            StoreKind::Relational,
            AppError::StoreTimeout { store: StoreKind::Relational, timeout_ms: 5 },
            Duration::from_millis(5),
        );
        failed.items.push(exact("ghost", 0));

        let merged = merge(
            &[
                failed,
                ok(StoreKind::Vector, vec![similar("a", 0.9, 0), similar("b", 0.8, 1), similar("c", 0.7, 2)]),
            ],
            2,
        );
        let ids: Vec<_> = merged.iter().map(|i| i.record_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(merge(&[], 5).is_empty());
        assert!(merge(&[ok(StoreKind::Vector, vec![similar("a", 0.9, 0)])], 0).is_empty());
    }
}
