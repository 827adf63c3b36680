//! Domain types for the backup engine.
//!
//! - BackupRun: one dump attempt and its lifecycle status
//! - BackupArtifact: where the dump lives and its checksum

pub mod run;

pub use run::{BackupArtifact, BackupRun, BackupStatus};
