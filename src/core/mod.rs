//! Core backup engine.
//!
//! This module contains:
//! - Orchestrator: BackupRun lifecycle (create, list, get, verify, delete)
//! - RecordStore: durable run metadata
//! - Retention: count-based pruning and the daily trigger
//! - Digest: SHA-256 content hashing
//! - Lock: single in-flight backup lease

pub mod digest;
pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod record_store;
pub mod retention;

// Re-export commonly used types
pub use digest::{digest, digest_file};
pub use error::BackupError;
pub use lock::BackupLock;
pub use orchestrator::{backup_file_name, BackupOrchestrator, OrchestratorSettings};
pub use record_store::{RecordStore, RunQuery, SqliteRecordStore, StoreError};
pub use retention::{
    enforce_retention, next_run_after, BackupScheduler, RetentionReport, ScheduleSettings,
    SweepReport,
};
