//! Backup run lifecycle.
//!
//! A BackupRun represents a single attempt to dump the database. It starts
//! `InProgress`, moves exactly once to `Completed` or `Failed`, and is then
//! immutable until deleted.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::BackupError;

/// One attempt to produce a database dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Lifecycle status
    pub status: BackupStatus,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// When the run left `InProgress`
    pub finished_at: Option<DateTime<Utc>>,

    /// Artifact metadata, present only once completed
    #[serde(flatten)]
    pub artifact: Option<BackupArtifact>,

    /// Error message recorded when the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Location and content digest of a dump file.
///
/// Storage path and checksum travel together so a run can never carry one
/// without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Absolute path of the dump file
    pub storage_path: PathBuf,

    /// Hex-encoded SHA-256 of the file at creation time
    pub checksum: String,
}

impl BackupArtifact {
    pub fn new(storage_path: impl Into<PathBuf>, checksum: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            checksum: checksum.into(),
        }
    }
}

impl BackupRun {
    /// Start a new run now
    pub fn start() -> Self {
        Self::start_at(Uuid::new_v4(), Utc::now())
    }

    /// Start a run with an explicit id and start time
    pub fn start_at(id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: BackupStatus::InProgress,
            started_at,
            finished_at: None,
            artifact: None,
            failure_reason: None,
        }
    }

    /// Transition to `Completed` with the produced artifact
    pub fn complete(&mut self, artifact: BackupArtifact) -> Result<(), BackupError> {
        self.complete_at(artifact, Utc::now())
    }

    pub fn complete_at(
        &mut self,
        artifact: BackupArtifact,
        finished_at: DateTime<Utc>,
    ) -> Result<(), BackupError> {
        self.ensure_in_progress(BackupStatus::Completed)?;
        self.status = BackupStatus::Completed;
        self.finished_at = Some(finished_at);
        self.artifact = Some(artifact);
        Ok(())
    }

    /// Transition to `Failed`, recording why
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), BackupError> {
        self.fail_at(reason, Utc::now())
    }

    pub fn fail_at(
        &mut self,
        reason: impl Into<String>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), BackupError> {
        self.ensure_in_progress(BackupStatus::Failed)?;
        self.status = BackupStatus::Failed;
        self.finished_at = Some(finished_at);
        self.artifact = None;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    fn ensure_in_progress(&self, to: BackupStatus) -> Result<(), BackupError> {
        if self.status != BackupStatus::InProgress {
            return Err(BackupError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// Path of the dump file, if the run completed
    pub fn storage_path(&self) -> Option<&PathBuf> {
        self.artifact.as_ref().map(|a| &a.storage_path)
    }

    /// Stored checksum, if the run completed
    pub fn checksum(&self) -> Option<&str> {
        self.artifact.as_ref().map(|a| a.checksum.as_str())
    }
}

/// Status of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown backup status: {}", other)),
        }
    }
}
