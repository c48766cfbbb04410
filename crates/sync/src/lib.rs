//! ArgoForge dual-store consistency
//!
//! - [`normalize`]: raw JSON float records to [`FloatRecord`](argoforge_common::FloatRecord)
//! - [`manager`]: ingestion ledger, reconciliation and storage statistics

pub mod manager;
pub mod normalize;

pub use manager::{
    ConsistencyManager, IngestCounts, IngestOutcome, IngestReport, IngestStatus, IngestionStats, LedgerEntry,
    StorageStats, SyncReport, SyncState,
};
pub use normalize::{normalize, normalize_batch, Rejected};
