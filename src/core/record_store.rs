//! Durable metadata for backup runs.
//!
//! One row per backup attempt. The orchestrator is the only writer; the
//! store itself has no lifecycle policy and only guarantees per-row
//! atomicity of each operation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{BackupArtifact, BackupRun, BackupStatus};

/// Errors from the record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt backup record: {0}")]
    Corrupt(String),

    #[error("Record does not exist: {0}")]
    Missing(Uuid),

    #[error("Record store lock poisoned")]
    Poisoned,

    #[error("Record store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Filter and offset for `find_many`. Results are always ordered by
/// `started_at`, most recent first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunQuery {
    pub status: Option<BackupStatus>,
    pub skip: usize,
}

impl RunQuery {
    pub fn with_status(mut self, status: BackupStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

/// Keyed CRUD surface over backup runs
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, run: &BackupRun) -> Result<(), StoreError>;

    async fn find_many(&self, query: RunQuery) -> Result<Vec<BackupRun>, StoreError>;

    async fn find_unique(&self, id: Uuid) -> Result<Option<BackupRun>, StoreError>;

    /// Persist the mutable fields of an existing run
    async fn update(&self, run: &BackupRun) -> Result<(), StoreError>;

    /// Delete a run, returning whether it existed
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS backup_runs (
    id             TEXT PRIMARY KEY NOT NULL,
    status         TEXT NOT NULL,
    started_at_us  INTEGER NOT NULL,
    finished_at_us INTEGER,
    storage_path   TEXT,
    checksum       TEXT,
    failure_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_backup_runs_status_started
    ON backup_runs (status, started_at_us);
";

const COLUMNS: &str =
    "id, status, started_at_us, finished_at_us, storage_path, checksum, failure_reason";

/// SQLite-backed record store.
///
/// rusqlite is synchronous, so every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open(path)?)
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, run: &BackupRun) -> Result<(), StoreError> {
        let row = RawRun::from_run(run);
        self.with_conn(move |conn| {
            conn.execute(
                &format!("INSERT INTO backup_runs ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    row.id,
                    row.status,
                    row.started_at_us,
                    row.finished_at_us,
                    row.storage_path,
                    row.checksum,
                    row.failure_reason,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_many(&self, query: RunQuery) -> Result<Vec<BackupRun>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM backup_runs
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY started_at_us DESC, rowid DESC
                 LIMIT -1 OFFSET ?2"
            ))?;

            let rows = stmt.query_map(
                params![query.status.map(|s| s.as_str()), query.skip as i64],
                RawRun::from_row,
            )?;

            let mut runs = Vec::new();
            for row in rows {
                runs.push(row?.into_run()?);
            }
            Ok(runs)
        })
        .await
    }

    async fn find_unique(&self, id: Uuid) -> Result<Option<BackupRun>, StoreError> {
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM backup_runs WHERE id = ?1"),
                    params![id.to_string()],
                    RawRun::from_row,
                )
                .optional()?;

            raw.map(RawRun::into_run).transpose()
        })
        .await
    }

    async fn update(&self, run: &BackupRun) -> Result<(), StoreError> {
        let id = run.id;
        let row = RawRun::from_run(run);
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE backup_runs
                 SET status = ?2, finished_at_us = ?3, storage_path = ?4, checksum = ?5,
                     failure_reason = ?6
                 WHERE id = ?1",
                params![
                    row.id,
                    row.status,
                    row.finished_at_us,
                    row.storage_path,
                    row.checksum,
                    row.failure_reason,
                ],
            )?;

            if changed == 0 {
                return Err(StoreError::Missing(id));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM backup_runs WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

/// A row as stored, before domain validation
struct RawRun {
    id: String,
    status: String,
    started_at_us: i64,
    finished_at_us: Option<i64>,
    storage_path: Option<String>,
    checksum: Option<String>,
    failure_reason: Option<String>,
}

impl RawRun {
    fn from_run(run: &BackupRun) -> Self {
        Self {
            id: run.id.to_string(),
            status: run.status.as_str().to_string(),
            started_at_us: run.started_at.timestamp_micros(),
            finished_at_us: run.finished_at.map(|t| t.timestamp_micros()),
            storage_path: run
                .storage_path()
                .map(|p| p.to_string_lossy().into_owned()),
            checksum: run.checksum().map(str::to_string),
            failure_reason: run.failure_reason.clone(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            started_at_us: row.get(2)?,
            finished_at_us: row.get(3)?,
            storage_path: row.get(4)?,
            checksum: row.get(5)?,
            failure_reason: row.get(6)?,
        })
    }

    fn into_run(self) -> Result<BackupRun, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Corrupt(format!("invalid id '{}': {}", self.id, e)))?;
        let status: BackupStatus = self
            .status
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("{}: {}", id, e)))?;
        let started_at = from_micros(id, self.started_at_us)?;
        let finished_at = self
            .finished_at_us
            .map(|us| from_micros(id, us))
            .transpose()?;

        let artifact = match (self.storage_path, self.checksum) {
            (Some(path), Some(checksum)) => {
                Some(BackupArtifact::new(PathBuf::from(path), checksum))
            }
            (None, None) => None,
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "{}: storage path and checksum must be set together",
                    id
                )))
            }
        };

        Ok(BackupRun {
            id,
            status,
            started_at,
            finished_at,
            artifact,
            failure_reason: self.failure_reason,
        })
    }
}

fn from_micros(id: Uuid, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("{}: timestamp out of range", id)))
}
