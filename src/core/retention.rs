//! Retention sweep and daily backup trigger.
//!
//! Retention counts `COMPLETED` runs only: the newest `max_retained` are
//! kept and the rest are deleted through the orchestrator. `FAILED` and
//! `IN_PROGRESS` runs are never pruned automatically.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::BackupRun;

use super::error::BackupError;
use super::orchestrator::BackupOrchestrator;

/// Default number of completed backups to keep
pub const DEFAULT_MAX_RETAINED: usize = 30;

/// Scheduling and retention settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    /// Feature flag; a disabled schedule is a no-op
    pub enabled: bool,

    /// Number of completed backups to keep
    pub max_retained: usize,

    /// UTC time of day the daily sweep runs at
    pub run_at: NaiveTime,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retained: DEFAULT_MAX_RETAINED,
            run_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    /// The limit the pass enforced
    pub kept_limit: usize,

    /// Runs deleted, newest first
    pub deleted: Vec<Uuid>,

    /// Runs that could not be deleted, with the reason
    pub failures: Vec<(Uuid, String)>,
}

/// Outcome of one scheduled sweep
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepReport {
    /// The feature flag is off
    Disabled,

    Ran {
        /// The backup made by this sweep
        backup: Option<BackupRun>,

        /// Why the backup failed, if it did
        backup_error: Option<String>,

        retention: RetentionReport,
    },
}

/// Drives scheduled backups and retention
pub struct BackupScheduler {
    orchestrator: Arc<BackupOrchestrator>,
    settings: ScheduleSettings,
}

impl BackupScheduler {
    pub fn new(orchestrator: Arc<BackupOrchestrator>, settings: ScheduleSettings) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    /// Delete completed backups beyond the configured limit
    pub async fn enforce_retention(&self) -> Result<RetentionReport, BackupError> {
        enforce_retention(&self.orchestrator, self.settings.max_retained).await
    }

    /// One scheduled sweep: back up, then prune.
    ///
    /// A failed backup is reported, and pruning still runs: the pruned set only
    /// contains completed runs, so a failure never shrinks the recovery window.
    pub async fn run_scheduled(&self) -> Result<SweepReport, BackupError> {
        if !self.settings.enabled {
            info!("Scheduled backups disabled, skipping sweep");
            return Ok(SweepReport::Disabled);
        }

        let (backup, backup_error) = match self.orchestrator.create_backup().await {
            Ok(run) => (Some(run), None),
            Err(e) => {
                error!(error = %e, "Scheduled backup failed");
                (None, Some(e.to_string()))
            }
        };

        let retention = self.enforce_retention().await?;

        Ok(SweepReport::Ran {
            backup,
            backup_error,
            retention,
        })
    }

    /// Run the daily sweep until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(run_at = %self.settings.run_at, "Backup scheduler started");

        loop {
            let now = Utc::now();
            let next = next_run_after(now, self.settings.run_at);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %next, "Waiting for next scheduled backup");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Backup scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.run_scheduled().await {
                Ok(report) => info!(?report, "Scheduled sweep finished"),
                Err(e) => error!(error = %e, "Scheduled sweep failed"),
            }
        }
    }
}

/// Keep the `keep` newest completed runs; delete the rest.
///
/// Deletion is best-effort: a failure on one run is logged and recorded in
/// the report without stopping the others.
pub async fn enforce_retention(
    orchestrator: &BackupOrchestrator,
    keep: usize,
) -> Result<RetentionReport, BackupError> {
    let excess = orchestrator.excess_completed(keep).await?;
    let mut report = RetentionReport {
        kept_limit: keep,
        ..Default::default()
    };

    if excess.is_empty() {
        info!(keep, "Nothing to prune");
        return Ok(report);
    }

    info!(keep, excess = excess.len(), "Pruning old backups");
    for run in excess {
        match orchestrator.delete_backup(run.id).await {
            Ok(()) => report.deleted.push(run.id),
            Err(e) => {
                warn!(backup_id = %run.id, error = %e, "Failed to prune backup");
                report.failures.push((run.id, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Next occurrence of `run_at` (UTC) strictly after `now`
pub fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(run_at).and_utc();
    if today > now {
        return today;
    }
    now.date_naive()
        .checked_add_days(Days::new(1))
        .map(|d| d.and_time(run_at).and_utc())
        .unwrap_or(today)
}
