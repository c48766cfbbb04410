//! Dual-store consistency manager
//!
//! The only writer to both stores. Ingestion writes each record to the
//! relational store and (after embedding) to the vector store independently
//! and reports a per-record outcome. Reconciliation diffs the key sets of the
//! two stores, repairs what it can and surfaces the rest.

use crate::normalize::{normalize_batch, Rejected};
use argoforge_common::config::IngestConfig;
use argoforge_common::embeddings::EmbeddingGateway;
use argoforge_common::errors::{AppError, ErrorCode, Result};
use argoforge_common::metrics;
use argoforge_common::records::FloatRecord;
use argoforge_common::stores::{RelationalStore, StoreSet, VectorStore};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Per-record ingest outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    BothOk,
    RelationalOnly,
    VectorOnly,
    BothFailed,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::BothOk => "both_ok",
            IngestOutcome::RelationalOnly => "relational_only",
            IngestOutcome::VectorOnly => "vector_only",
            IngestOutcome::BothFailed => "both_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureDetail {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&AppError> for FailureDetail {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Ledger line for one ingested record
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub record_id: String,
    pub outcome: IngestOutcome,
    /// `PARTIAL_INGEST_FAILURE` when exactly one store was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relational_error: Option<FailureDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_error: Option<FailureDetail>,
}

impl LedgerEntry {
    fn new(record_id: String, relational: Result<()>, vector: Result<()>) -> Self {
        let outcome = match (&relational, &vector) {
            (Ok(()), Ok(())) => IngestOutcome::BothOk,
            (Ok(()), Err(_)) => IngestOutcome::RelationalOnly,
            (Err(_), Ok(())) => IngestOutcome::VectorOnly,
            (Err(_), Err(_)) => IngestOutcome::BothFailed,
        };
        let code = matches!(outcome, IngestOutcome::RelationalOnly | IngestOutcome::VectorOnly)
            .then_some(ErrorCode::PartialIngestFailure);

        Self {
            record_id,
            outcome,
            code,
            relational_error: relational.as_ref().err().map(FailureDetail::from),
            vector_error: vector.as_ref().err().map(FailureDetail::from),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub both_ok: usize,
    pub relational_only: usize,
    pub vector_only: usize,
    pub both_failed: usize,
}

impl IngestCounts {
    fn add(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::BothOk => self.both_ok += 1,
            IngestOutcome::RelationalOnly => self.relational_only += 1,
            IngestOutcome::VectorOnly => self.vector_only += 1,
            IngestOutcome::BothFailed => self.both_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.both_ok + self.relational_only + self.vector_only + self.both_failed
    }

    fn labelled(&self) -> [(&'static str, usize); 4] {
        [
            (IngestOutcome::BothOk.as_str(), self.both_ok),
            (IngestOutcome::RelationalOnly.as_str(), self.relational_only),
            (IngestOutcome::VectorOnly.as_str(), self.vector_only),
            (IngestOutcome::BothFailed.as_str(), self.both_failed),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub status: IngestStatus,
    pub counts: IngestCounts,
    pub ledger: Vec<LedgerEntry>,
    pub rejected: Vec<Rejected>,
    pub duration_ms: u64,
}

impl IngestReport {
    fn status_for(counts: &IngestCounts, rejected: usize) -> IngestStatus {
        let total = counts.total();
        if counts.both_ok == total && rejected == 0 {
            IngestStatus::Success
        } else if counts.both_failed == total {
            IngestStatus::Failed
        } else {
            IngestStatus::Partial
        }
    }
}

/// Cumulative ingestion statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionStats {
    pub runs: u64,
    pub total_processed: u64,
    pub both_ok: u64,
    pub relational_only: u64,
    pub vector_only: u64,
    pub both_failed: u64,
    pub rejected: u64,
    pub last_run_started: Option<DateTime<Utc>>,
    pub last_run_finished: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub records_per_second: Option<f64>,
}

/// Reconciled state of one record id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced,
    PendingRelational,
    PendingVector,
    Conflict,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::PendingRelational => "pending_relational",
            SyncState::PendingVector => "pending_vector",
            SyncState::Conflict => "conflict",
        }
    }
}

/// Any record that needed attention during a reconcile run
#[derive(Debug, Clone, Serialize)]
pub struct SyncEntry {
    pub record_id: String,
    pub state: SyncState,
    /// True when the vector entry was rebuilt from the relational row
    pub repaired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub synced: usize,
    pub pending_relational: usize,
    pub pending_vector: usize,
    pub conflict: usize,
}

impl SyncCounts {
    fn add(&mut self, state: SyncState) {
        match state {
            SyncState::Synced => self.synced += 1,
            SyncState::PendingRelational => self.pending_relational += 1,
            SyncState::PendingVector => self.pending_vector += 1,
            SyncState::Conflict => self.conflict += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub relational_count: usize,
    pub vector_count: usize,
    pub counts: SyncCounts,
    /// Vector entries written by this run
    pub repaired: usize,
    pub records: Vec<SyncEntry>,
}

impl SyncReport {
    pub fn state_of(&self, record_id: &str) -> Option<SyncState> {
        self.records
            .iter()
            .find(|entry| entry.record_id == record_id)
            .map(|entry| entry.state)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub relational_count: u64,
    pub vector_count: u64,
    /// `healthy` or `out_of_sync`
    pub sync_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<SyncSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub counts: SyncCounts,
    pub repaired: usize,
}

pub struct ConsistencyManager {
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingGateway>,
    config: IngestConfig,
    /// Record ids with an ingest write in progress, with a reference count
    in_flight: Mutex<HashMap<String, usize>>,
    stats: Mutex<IngestionStats>,
    last_sync: Mutex<Option<SyncReport>>,
    /// Serializes reconcile runs; never taken by ingest or queries
    reconcile_running: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a record id as in flight until dropped
struct InFlight<'a> {
    registry: &'a Mutex<HashMap<String, usize>>,
    record_id: String,
}

impl<'a> InFlight<'a> {
    fn enter(registry: &'a Mutex<HashMap<String, usize>>, record_id: &str) -> Self {
        *lock(registry).entry(record_id.to_string()).or_insert(0) += 1;
        Self {
            registry,
            record_id: record_id.to_string(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut registry = lock(self.registry);
        if let Some(count) = registry.get_mut(&self.record_id) {
            *count -= 1;
            if *count == 0 {
                registry.remove(&self.record_id);
            }
        }
    }
}

impl ConsistencyManager {
    pub fn new(stores: StoreSet, embeddings: Arc<EmbeddingGateway>, config: IngestConfig) -> Self {
        Self {
            relational: stores.relational,
            vector: stores.vector,
            embeddings,
            config,
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(IngestionStats::default()),
            last_sync: Mutex::new(None),
            reconcile_running: tokio::sync::Mutex::new(()),
        }
    }

    fn is_in_flight(&self, record_id: &str) -> bool {
        lock(&self.in_flight).contains_key(record_id)
    }

    /// Normalize raw JSON objects and ingest the valid ones
    pub async fn ingest(&self, raw: &[Value]) -> IngestReport {
        let (records, rejected) = normalize_batch(raw);
        self.ingest_records(records, rejected).await
    }

    /// Write every record to both stores and report each outcome.
    /// Record ids must be unique within `records`.
    #[instrument(skip_all, fields(records = records.len(), rejected = rejected.len()))]
    async fn ingest_records(&self, records: Vec<FloatRecord>, rejected: Vec<Rejected>) -> IngestReport {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let started = Instant::now();

        let batch_size = self.config.batch_size.max(1);
        let concurrency = self.config.max_concurrency.max(1);
        let mut ledger = Vec::with_capacity(records.len());

        for (batch_index, batch) in records.chunks(batch_size).enumerate() {
            debug!(batch = batch_index, size = batch.len(), "Ingesting batch");
            let pending: Vec<_> = batch.iter().map(|record| self.ingest_one(record)).collect();
            let entries: Vec<LedgerEntry> = stream::iter(pending)
                .buffered(concurrency)
                .collect()
                .await;
            ledger.extend(entries);
        }

        let mut counts = IngestCounts::default();
        for entry in &ledger {
            counts.add(entry.outcome);
        }

        let elapsed = started.elapsed();
        let status = IngestReport::status_for(&counts, rejected.len());
        metrics::record_ingestion(elapsed.as_secs_f64(), &counts.labelled());
        self.update_stats(&counts, rejected.len(), started_at, elapsed);

        if status == IngestStatus::Success {
            info!(%run_id, both_ok = counts.both_ok, "Ingest completed");
        } else {
            warn!(
                %run_id,
                both_ok = counts.both_ok,
                relational_only = counts.relational_only,
                vector_only = counts.vector_only,
                both_failed = counts.both_failed,
                rejected = rejected.len(),
                "Ingest completed with failures"
            );
        }

        IngestReport {
            run_id,
            status,
            counts,
            ledger,
            rejected,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// Both writes run concurrently; neither waits on the other's outcome
    async fn ingest_one(&self, record: &FloatRecord) -> LedgerEntry {
        let _in_flight = InFlight::enter(&self.in_flight, &record.record_id);

        let (relational, vector) = tokio::join!(self.relational.upsert(record), self.write_vector(record));

        let entry = LedgerEntry::new(record.record_id.clone(), relational, vector);
        if entry.outcome != IngestOutcome::BothOk {
            warn!(
                record_id = %entry.record_id,
                outcome = entry.outcome.as_str(),
                relational_error = ?entry.relational_error.as_ref().map(|e| &e.message),
                vector_error = ?entry.vector_error.as_ref().map(|e| &e.message),
                "Record not written to both stores"
            );
        }
        entry
    }

    async fn write_vector(&self, record: &FloatRecord) -> Result<()> {
        let text = record.embedding_text();
        let embedding = self.embeddings.embed(&text).await?;
        self.vector
            .upsert(&record.record_id, embedding, record.metadata(), text)
            .await
    }

    fn update_stats(&self, counts: &IngestCounts, rejected: usize, started_at: DateTime<Utc>, elapsed: Duration) {
        let mut stats = lock(&self.stats);
        stats.runs += 1;
        stats.total_processed += counts.total() as u64;
        stats.both_ok += counts.both_ok as u64;
        stats.relational_only += counts.relational_only as u64;
        stats.vector_only += counts.vector_only as u64;
        stats.both_failed += counts.both_failed as u64;
        stats.rejected += rejected as u64;
        stats.last_run_started = Some(started_at);
        stats.last_run_finished = Some(Utc::now());
        stats.last_duration_ms = Some(elapsed.as_millis() as u64);
        let secs = elapsed.as_secs_f64();
        stats.records_per_second = (secs > 0.0 && counts.total() > 0).then(|| counts.total() as f64 / secs);
    }

    pub fn ingestion_stats(&self) -> IngestionStats {
        lock(&self.stats).clone()
    }

    pub fn reset_ingestion_stats(&self) {
        *lock(&self.stats) = IngestionStats::default();
    }

    /// Diff both key sets, repair relational-only records and report the rest.
    ///
    /// Vector-only records are never deleted; they stay `Conflict` until a
    /// relational row appears.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<SyncReport> {
        let _running = self.reconcile_running.lock().await;
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let started = Instant::now();

        let (relational_ids, vector_ids) = tokio::try_join!(self.relational.list_ids(), self.vector.list_ids())?;
        let relational: BTreeSet<String> = relational_ids.into_iter().collect();
        let vector: BTreeSet<String> = vector_ids.into_iter().collect();

        let mut counts = SyncCounts::default();
        let mut records = Vec::new();
        let mut repaired = 0;

        counts.synced += relational.intersection(&vector).count();

        for record_id in relational.difference(&vector) {
            let entry = if self.is_in_flight(record_id) {
                pending(record_id, SyncState::PendingVector, "ingest in progress")
            } else {
                match self.repair_vector(record_id).await {
                    Ok(true) => {
                        repaired += 1;
                        SyncEntry {
                            record_id: record_id.clone(),
                            state: SyncState::Synced,
                            repaired: true,
                            code: None,
                            reason: None,
                        }
                    }
                    // Row deleted since the snapshot; nothing left to reconcile
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(record_id = %record_id, error = %e, "Vector repair failed");
                        SyncEntry {
                            record_id: record_id.clone(),
                            state: SyncState::PendingVector,
                            repaired: false,
                            code: Some(e.code()),
                            reason: Some(format!("repair failed: {}", e)),
                        }
                    }
                }
            };
            counts.add(entry.state);
            records.push(entry);
        }

        for record_id in vector.difference(&relational) {
            let entry = if self.is_in_flight(record_id) {
                pending(record_id, SyncState::PendingRelational, "ingest in progress")
            } else {
                match self.relational.get(record_id).await {
                    Ok(Some(_)) => {
                        pending(record_id, SyncState::PendingRelational, "relational row appeared during reconcile")
                    }
                    Ok(None) => SyncEntry {
                        record_id: record_id.clone(),
                        state: SyncState::Conflict,
                        repaired: false,
                        code: Some(ErrorCode::SyncConflict),
                        reason: Some("no authoritative relational payload".to_string()),
                    },
                    Err(e) => {
                        warn!(record_id = %record_id, error = %e, "Relational lookup failed during reconcile");
                        SyncEntry {
                            record_id: record_id.clone(),
                            state: SyncState::PendingRelational,
                            repaired: false,
                            code: Some(e.code()),
                            reason: Some(format!("relational lookup failed: {}", e)),
                        }
                    }
                }
            };
            counts.add(entry.state);
            records.push(entry);
        }

        let report = SyncReport {
            run_id,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            relational_count: relational.len(),
            vector_count: vector.len(),
            counts,
            repaired,
            records,
        };

        metrics::record_reconcile(&[
            (SyncState::Synced.as_str(), counts.synced),
            (SyncState::PendingRelational.as_str(), counts.pending_relational),
            (SyncState::PendingVector.as_str(), counts.pending_vector),
            (SyncState::Conflict.as_str(), counts.conflict),
        ]);

        if counts.conflict > 0 || counts.pending_vector > 0 {
            warn!(
                %run_id,
                synced = counts.synced,
                repaired,
                pending_vector = counts.pending_vector,
                pending_relational = counts.pending_relational,
                conflict = counts.conflict,
                "Reconcile found divergence"
            );
        } else {
            info!(%run_id, synced = counts.synced, repaired, "Reconcile completed");
        }

        *lock(&self.last_sync) = Some(report.clone());
        Ok(report)
    }

    /// Rebuild the vector entry from the relational row; `false` when the row is gone
    async fn repair_vector(&self, record_id: &str) -> Result<bool> {
        let Some(record) = self.relational.get(record_id).await? else {
            return Ok(false);
        };
        self.write_vector(&record).await?;
        debug!(record_id, "Vector entry repaired");
        Ok(true)
    }

    pub fn last_sync(&self) -> Option<SyncReport> {
        lock(&self.last_sync).clone()
    }

    pub async fn storage_stats(&self) -> Result<StorageStats> {
        let (relational_count, vector_count) = tokio::try_join!(self.relational.count(), self.vector.count())?;
        let last_sync = self.last_sync();

        let conflicts = last_sync.as_ref().map_or(0, |report| report.counts.conflict);
        let sync_status = if relational_count == vector_count && conflicts == 0 {
            "healthy"
        } else {
            "out_of_sync"
        };

        Ok(StorageStats {
            relational_count,
            vector_count,
            sync_status,
            last_sync: last_sync.map(|report| SyncSummary {
                run_id: report.run_id,
                started_at: report.started_at,
                counts: report.counts,
                repaired: report.repaired,
            }),
        })
    }

    /// Run `reconcile` every `interval` until the task is aborted
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.reconcile().await {
                    error!(error = %e, "Periodic reconcile failed");
                }
            }
        })
    }
}

fn pending(record_id: &str, state: SyncState, reason: &str) -> SyncEntry {
    SyncEntry {
        record_id: record_id.to_string(),
        state,
        repaired: false,
        code: None,
        reason: Some(reason.to_string()),
    }
}
