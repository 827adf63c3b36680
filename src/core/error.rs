//! Error taxonomy for backup operations.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::adapters::ProcessError;
use crate::core::record_store::StoreError;
use crate::domain::BackupStatus;

/// Errors surfaced by the backup orchestrator
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backup not found: {0}")]
    NotFound(Uuid),

    #[error("Another backup is already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Filesystem error at {}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: BackupStatus, to: BackupStatus },
}

impl BackupError {
    /// Wrap an I/O error with the path it happened at
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message_is_ascii() {
        let err = BackupError::InvalidTransition {
            from: BackupStatus::Failed,
            to: BackupStatus::Completed,
        };
        assert_eq!(err.to_string(), "Invalid state transition: FAILED -> COMPLETED");
        assert!(err.to_string().is_ascii());
    }
}
