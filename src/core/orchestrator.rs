//! Backup orchestrator.
//!
//! Owns the BackupRun lifecycle: records the attempt, selects a dump
//! strategy, runs the dump, stamps the checksum, and finalizes the record.
//! Every failure during creation is written back as `FAILED` before it is
//! returned to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    ConnectionParams, DumpSettings, DumpStrategy, DumpTarget, ProcessRunner, RunLimits,
};
use crate::domain::{BackupArtifact, BackupRun, BackupStatus};

use super::digest::digest_file;
use super::error::BackupError;
use super::lock::BackupLock;
use super::record_store::{RecordStore, RunQuery};

/// Settings the orchestrator needs from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Directory dump files are written to
    pub backup_dir: PathBuf,

    /// Lock file guarding against concurrent backups, created apart from `backup_dir`
    pub lock_path: PathBuf,

    /// Connection descriptor (`postgres://...`); checked at backup time
    pub database_url: Option<String>,

    /// Dump command settings
    pub dump: DumpSettings,
}

/// Main backup orchestrator
pub struct BackupOrchestrator {
    store: Arc<dyn RecordStore>,
    runner: Arc<dyn ProcessRunner>,
    strategy: DumpStrategy,
    backup_dir: PathBuf,
    lock_path: PathBuf,
    database_url: Option<String>,
}

impl BackupOrchestrator {
    /// Create an orchestrator for the current platform
    pub fn new(
        store: Arc<dyn RecordStore>,
        runner: Arc<dyn ProcessRunner>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            runner,
            strategy: DumpStrategy::new(settings.dump),
            backup_dir: settings.backup_dir,
            lock_path: settings.lock_path,
            database_url: settings.database_url,
        }
    }

    /// Replace the dump strategy (e.g. to pin the platform)
    pub fn with_strategy(mut self, strategy: DumpStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Produce a new dump and record it.
    ///
    /// Rejects the call with `AlreadyRunning` while another backup holds the
    /// lock; no record is written in that case. On failure any partial dump
    /// file is removed before the run is marked `FAILED`.
    #[instrument(skip(self))]
    pub async fn create_backup(&self) -> Result<BackupRun, BackupError> {
        let _lock = BackupLock::acquire(&self.lock_path)?;

        let mut run = BackupRun::start();
        self.store.create(&run).await?;
        info!(backup_id = %run.id, "Backup started");

        let mut output_path = None;
        let outcome = match self.produce_artifact(run.started_at, &mut output_path).await {
            Ok(artifact) => self.finish_completed(&mut run, artifact).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!(
                    backup_id = %run.id,
                    path = ?run.storage_path(),
                    checksum = ?run.checksum(),
                    "Backup completed"
                );
                Ok(run)
            }
            Err(e) => {
                if let Some(path) = output_path {
                    discard_partial(run.id, &path).await;
                }
                self.finish_failed(&mut run, &e).await;
                Err(e)
            }
        }
    }

    /// Steps 2-7: directory, filename, connection, strategy, dump, digest.
    ///
    /// `output_path` is set as soon as the dump may have written to disk.
    async fn produce_artifact(
        &self,
        started_at: DateTime<Utc>,
        output_path: &mut Option<PathBuf>,
    ) -> Result<BackupArtifact, BackupError> {
        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| BackupError::fs(&self.backup_dir, e))?;
        let directory = fs::canonicalize(&self.backup_dir)
            .await
            .map_err(|e| BackupError::fs(&self.backup_dir, e))?;

        let target = DumpTarget::new(directory, backup_file_name(started_at));
        let params = ConnectionParams::from_config(self.database_url.as_deref())?;

        let command = self
            .strategy
            .select(self.runner.as_ref(), &params, &target)
            .await;
        info!(command = %command.spec, "Running dump");

        *output_path = Some(command.output_path.clone());
        self.runner
            .run(
                &command.spec,
                RunLimits::dump(self.strategy.settings().max_output_bytes),
            )
            .await?;

        let checksum = digest_file(&command.output_path)
            .await
            .map_err(|e| BackupError::fs(&command.output_path, e))?;

        Ok(BackupArtifact::new(command.output_path, checksum))
    }

    async fn finish_completed(
        &self,
        run: &mut BackupRun,
        artifact: BackupArtifact,
    ) -> Result<(), BackupError> {
        let mut completed = run.clone();
        completed.complete(artifact)?;
        self.store.update(&completed).await?;
        *run = completed;
        Ok(())
    }

    /// Record the failure; a store error here is logged, the original error wins
    async fn finish_failed(&self, run: &mut BackupRun, cause: &BackupError) {
        error!(backup_id = %run.id, error = %cause, "Backup failed");

        if let Err(e) = run.fail(cause.to_string()) {
            warn!(backup_id = %run.id, error = %e, "Run already finalized");
            return;
        }
        if let Err(e) = self.store.update(run).await {
            error!(backup_id = %run.id, error = %e, "Failed to mark backup as FAILED");
        }
    }

    /// All runs, most recently started first
    pub async fn list_backups(&self) -> Result<Vec<BackupRun>, BackupError> {
        Ok(self.store.find_many(RunQuery::default()).await?)
    }

    pub async fn get_backup(&self, id: Uuid) -> Result<BackupRun, BackupError> {
        self.store
            .find_unique(id)
            .await?
            .ok_or(BackupError::NotFound(id))
    }

    /// Re-hash the dump file and compare it with the stored checksum.
    ///
    /// Returns `false` rather than an error when the run has no artifact, the
    /// file is gone or unreadable, or the content changed. Never mutates.
    #[instrument(skip(self))]
    pub async fn verify_backup(&self, id: Uuid) -> Result<bool, BackupError> {
        let run = self.get_backup(id).await?;

        let Some(artifact) = run.artifact else {
            info!(backup_id = %id, status = %run.status, "No artifact to verify");
            return Ok(false);
        };

        if !fs::try_exists(&artifact.storage_path).await.unwrap_or(false) {
            warn!(backup_id = %id, path = %artifact.storage_path.display(), "Backup file missing");
            return Ok(false);
        }

        let current = match digest_file(&artifact.storage_path).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!(backup_id = %id, error = %e, "Failed to hash backup file");
                return Ok(false);
            }
        };

        let intact = current == artifact.checksum;
        if intact {
            info!(backup_id = %id, "Backup verified");
        } else {
            warn!(
                backup_id = %id,
                expected = %artifact.checksum,
                actual = %current,
                "Backup checksum mismatch"
            );
        }
        Ok(intact)
    }

    /// Delete the dump file (if still present) and the record.
    #[instrument(skip(self))]
    pub async fn delete_backup(&self, id: Uuid) -> Result<(), BackupError> {
        let run = self.get_backup(id).await?;

        if let Some(path) = run.storage_path() {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(backup_id = %id, path = %path.display(), "Backup file already gone");
                }
                Err(e) => return Err(BackupError::fs(path, e)),
            }
        }

        if !self.store.delete(id).await? {
            return Err(BackupError::NotFound(id));
        }

        info!(backup_id = %id, "Backup deleted");
        Ok(())
    }

    /// Completed runs beyond the `keep` most recent, newest first
    pub async fn excess_completed(&self, keep: usize) -> Result<Vec<BackupRun>, BackupError> {
        Ok(self
            .store
            .find_many(
                RunQuery::default()
                    .with_status(BackupStatus::Completed)
                    .skip(keep),
            )
            .await?)
    }
}

/// Best-effort removal of a dump file left by a failed run.
///
/// A FAILED run carries no storage path, so nothing else would ever reach it.
async fn discard_partial(id: Uuid, path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => info!(backup_id = %id, path = %path.display(), "Removed partial dump"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            backup_id = %id,
            path = %path.display(),
            error = %e,
            "Failed to remove partial dump"
        ),
    }
}

/// File name for a dump started at `at`, with `:` and `.` made filename-safe
pub fn backup_file_name(at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("backup-{}.dump", stamp)
}
