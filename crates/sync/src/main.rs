//! ArgoForge Sync Worker
//!
//! Runs dual-store reconciliation outside the API process:
//! 1. Snapshots record ids in both stores
//! 2. Repairs relational-only records into the vector store
//! 3. Reports vector-only records as conflicts
//!
//! `sync-worker once` runs a single pass and prints the report as JSON.

use argoforge_common::{
    config::AppConfig,
    embeddings::EmbeddingGateway,
    metrics,
    stores::StoreSet,
    VERSION,
};
use argoforge_sync::ConsistencyManager;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.observability.log_level))
        .with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(service = %config.observability.service_name, "Starting ArgoForge Sync Worker v{}", VERSION);

    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        metrics::register_metrics();
        info!(%addr, "Metrics exporter listening");
    }

    info!(backend = ?config.storage.backend, "Connecting to stores...");
    let stores = StoreSet::from_config(&config).await?;

    let embeddings = Arc::new(EmbeddingGateway::from_config(&config).await?);
    info!(
        model = %embeddings.model_name(),
        dimension = embeddings.dimension(),
        "Embedding gateway initialized"
    );

    let manager = ConsistencyManager::new(stores, embeddings, config.ingest.clone());

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("once") {
        let report = manager.reconcile().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if config.sync.interval_secs == 0 {
        warn!("sync.interval_secs is 0, nothing to schedule");
        return Ok(());
    }

    let interval = Duration::from_secs(config.sync.interval_secs);
    let max_failures = config.sync.max_consecutive_failures.max(1);
    let mut consecutive_failures = 0u32;

    info!(interval_secs = config.sync.interval_secs, "Sync worker ready");

    loop {
        // Circuit breaker check
        if consecutive_failures >= max_failures {
            warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = tokio::time::sleep(CIRCUIT_BREAK_DURATION) => {}
            }
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        match manager.reconcile().await {
            Ok(report) => {
                consecutive_failures = 0;
                info!(
                    run_id = %report.run_id,
                    synced = report.counts.synced,
                    repaired = report.repaired,
                    conflict = report.counts.conflict,
                    "Reconcile pass finished"
                );
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(error = %e, failures = consecutive_failures, "Reconcile pass failed");
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Sync worker shutting down");
    Ok(())
}
