//! Metrics and observability utilities
//!
//! Prometheus metrics for query routing, store legs, embeddings,
//! ingestion and reconciliation.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all ArgoForge metrics
pub const METRICS_PREFIX: &str = "argoforge";

/// Histogram buckets for query and store-leg latency (in seconds).
/// The upper buckets cover the relational budget of 30s.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s - vector budget
    30.00,  // 30s - relational budget
];

/// Buckets for embedding latency
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050,
    0.100,
    0.250,
    0.500,
    1.000,
    2.000,
    5.000,
    10.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Routed queries by kind, strategy and outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end routed query latency in seconds"
    );

    describe_counter!(
        format!("{}_query_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Queries answered by the fallback store"
    );

    describe_counter!(
        format!("{}_store_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Store leg calls by store and outcome"
    );

    describe_histogram!(
        format!("{}_store_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Store leg latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider errors"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    describe_counter!(
        format!("{}_records_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Ingested records by per-store outcome"
    );

    describe_histogram!(
        format!("{}_ingest_batch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Ingest batch latency in seconds"
    );

    describe_counter!(
        format!("{}_reconcile_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Reconciliation runs"
    );

    describe_gauge!(
        format!("{}_reconcile_records", METRICS_PREFIX),
        Unit::Count,
        "Records per sync state after the last reconciliation"
    );

    tracing::info!("Metrics registered");
}

/// Record a completed routed query
pub fn record_query(duration_secs: f64, kind: &str, strategy: &str, outcome: &str, fallback_used: bool) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);

    if fallback_used {
        counter!(
            format!("{}_query_fallbacks_total", METRICS_PREFIX),
            "strategy" => strategy.to_string()
        )
        .increment(1);
    }
}

/// Record a single store leg
pub fn record_store_call(duration_secs: f64, store: &str, outcome: &str) {
    counter!(
        format!("{}_store_calls_total", METRICS_PREFIX),
        "store" => store.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_store_call_duration_seconds", METRICS_PREFIX),
        "store" => store.to_string()
    )
    .record(duration_secs);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Record one ingest batch, `outcomes` pairs an outcome label with its count
pub fn record_ingestion(duration_secs: f64, outcomes: &[(&str, usize)]) {
    for (outcome, count) in outcomes {
        counter!(
            format!("{}_records_ingested_total", METRICS_PREFIX),
            "outcome" => outcome.to_string()
        )
        .increment(*count as u64);
    }

    histogram!(format!("{}_ingest_batch_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record a reconciliation run, `states` pairs a sync state label with its count
pub fn record_reconcile(states: &[(&str, usize)]) {
    counter!(format!("{}_reconcile_runs_total", METRICS_PREFIX)).increment(1);

    for (state, count) in states {
        gauge!(
            format!("{}_reconcile_records", METRICS_PREFIX),
            "state" => state.to_string()
        )
        .set(*count as f64);
    }
}
