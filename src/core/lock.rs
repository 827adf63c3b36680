//! Exclusive lease ensuring at most one backup is in flight.
//!
//! The lease is an advisory `flock` on a lock file kept apart from the
//! backup directory (`<home>/backup.lock` by default), so taking it never
//! depends on the backup directory being usable. It is released when the
//! guard is dropped, including when the holding process dies.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use super::error::BackupError;

/// Default name of the lock file
pub const LOCK_FILE_NAME: &str = "backup.lock";

/// Held lease on the backup resource
#[derive(Debug)]
pub struct BackupLock {
    file: File,
    path: PathBuf,
}

impl BackupLock {
    /// Try to take the lease at `lock_path` without waiting.
    ///
    /// Returns `AlreadyRunning` if another holder exists, in this process
    /// or any other.
    pub fn acquire(lock_path: &Path) -> Result<Self, BackupError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BackupError::fs(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(lock_path)
            .map_err(|e| BackupError::fs(lock_path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %lock_path.display(), "Acquired backup lock");
                Ok(Self {
                    file,
                    path: lock_path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(BackupError::AlreadyRunning)
            }
            Err(e) => Err(BackupError::fs(lock_path, e)),
        }
    }
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(path = %self.path.display(), error = %e, "Failed to release backup lock");
        }
    }
}
