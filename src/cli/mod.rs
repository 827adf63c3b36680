//! Command-line interface for dumpwarden.
//!
//! Provides commands for taking, listing, verifying and deleting backups,
//! enforcing retention, and running the daily schedule.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::TokioProcessRunner;
use crate::config::{self, ResolvedConfig};
use crate::core::{
    enforce_retention, BackupOrchestrator, BackupScheduler, SqliteRecordStore, SweepReport,
};
use crate::domain::BackupRun;

/// dumpwarden - database backup orchestrator
#[derive(Parser, Debug)]
#[command(name = "dumpwarden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take a backup now
    Create,

    /// List all backups, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one backup
    Show {
        /// Backup ID (UUID)
        backup_id: String,
    },

    /// Re-hash a backup file and compare it with its recorded checksum
    Verify {
        /// Backup ID (UUID)
        backup_id: String,
    },

    /// Delete a backup file and its record
    Delete {
        /// Backup ID (UUID)
        backup_id: String,
    },

    /// Delete completed backups beyond the retention limit
    Prune {
        /// Number of completed backups to keep (defaults to configured limit)
        #[arg(short, long)]
        keep: Option<usize>,
    },

    /// Run the scheduled job once: back up, then prune
    Sweep,

    /// Run the daily schedule until interrupted
    Schedule,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Create => create_backup().await,
            Commands::List { json } => list_backups(json).await,
            Commands::Show { backup_id } => show_backup(&backup_id).await,
            Commands::Verify { backup_id } => verify_backup(&backup_id).await,
            Commands::Delete { backup_id } => delete_backup(&backup_id).await,
            Commands::Prune { keep } => prune(keep).await,
            Commands::Sweep => sweep().await,
            Commands::Schedule => schedule().await,
            Commands::Config => show_config(),
        }
    }
}

/// Build an orchestrator from the resolved configuration
fn build_orchestrator(cfg: &ResolvedConfig) -> Result<Arc<BackupOrchestrator>> {
    if let Some(parent) = cfg.records_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let store = SqliteRecordStore::open(&cfg.records_path).with_context(|| {
        format!(
            "Failed to open backup records: {}",
            cfg.records_path.display()
        )
    })?;

    Ok(Arc::new(BackupOrchestrator::new(
        Arc::new(store),
        Arc::new(TokioProcessRunner::new()),
        cfg.orchestrator_settings(),
    )))
}

fn parse_id(backup_id: &str) -> Result<Uuid> {
    Uuid::parse_str(backup_id).with_context(|| format!("Invalid backup ID: {}", backup_id))
}

async fn create_backup() -> Result<()> {
    let orchestrator = build_orchestrator(config::config()?)?;
    let run = orchestrator.create_backup().await?;

    println!("{}", run.id);
    eprintln!("\n[Backup {} completed]", run.id);
    if let (Some(path), Some(checksum)) = (run.storage_path(), run.checksum()) {
        eprintln!("  Path:     {}", path.display());
        eprintln!("  SHA-256:  {}", checksum);
    }

    Ok(())
}

async fn list_backups(json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config::config()?)?;
    let runs = orchestrator.list_backups().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No backups found");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<22} {:<18}", "BACKUP ID", "STATUS", "STARTED", "CHECKSUM");
    println!("{}", "-".repeat(92));

    for run in &runs {
        let checksum = run
            .checksum()
            .map(|c| c.chars().take(16).collect::<String>())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<12} {:<22} {:<18}",
            run.id,
            run.status.to_string(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            checksum
        );
    }

    println!("\nTotal: {} backups", runs.len());

    Ok(())
}

fn print_run(run: &BackupRun) {
    println!("Backup ID: {}", run.id);
    println!("Status:    {}", run.status);
    println!("Started:   {}", run.started_at);
    if let Some(finished) = run.finished_at {
        println!("Finished:  {}", finished);
    }
    if let Some(path) = run.storage_path() {
        println!("Path:      {}", path.display());
    }
    if let Some(checksum) = run.checksum() {
        println!("SHA-256:   {}", checksum);
    }
    if let Some(reason) = &run.failure_reason {
        println!("Error:     {}", reason);
    }
}

async fn show_backup(backup_id: &str) -> Result<()> {
    let id = parse_id(backup_id)?;
    let orchestrator = build_orchestrator(config::config()?)?;

    print_run(&orchestrator.get_backup(id).await?);

    Ok(())
}

async fn verify_backup(backup_id: &str) -> Result<()> {
    let id = parse_id(backup_id)?;
    let orchestrator = build_orchestrator(config::config()?)?;

    if orchestrator.verify_backup(id).await? {
        println!("OK: backup {} matches its checksum", id);
        Ok(())
    } else {
        eprintln!("FAILED: backup {} is missing or does not match its checksum", id);
        std::process::exit(1);
    }
}

async fn delete_backup(backup_id: &str) -> Result<()> {
    let id = parse_id(backup_id)?;
    let orchestrator = build_orchestrator(config::config()?)?;

    orchestrator.delete_backup(id).await?;
    println!("Deleted backup {}", id);

    Ok(())
}

async fn prune(keep: Option<usize>) -> Result<()> {
    let cfg = config::config()?;
    let orchestrator = build_orchestrator(cfg)?;
    let keep = keep.unwrap_or(cfg.schedule.max_retained);

    let report = enforce_retention(&orchestrator, keep).await?;

    println!(
        "Kept up to {} completed backups, deleted {}",
        report.kept_limit,
        report.deleted.len()
    );
    for (id, reason) in &report.failures {
        eprintln!("  could not delete {}: {}", id, reason);
    }

    if !report.failures.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

async fn sweep() -> Result<()> {
    let cfg = config::config()?;
    let scheduler = BackupScheduler::new(build_orchestrator(cfg)?, cfg.schedule.clone());

    match scheduler.run_scheduled().await? {
        SweepReport::Disabled => {
            println!(
                "Scheduled backups are disabled (set {}=true to enable)",
                config::ENV_BACKUP_ENABLED
            );
        }
        SweepReport::Ran {
            backup,
            backup_error,
            retention,
        } => {
            if let Some(run) = backup {
                println!("Backup {} completed", run.id);
            }
            if let Some(error) = &backup_error {
                eprintln!("Backup failed: {}", error);
            }
            println!("Pruned {} old backups", retention.deleted.len());

            if backup_error.is_some() || !retention.failures.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn schedule() -> Result<()> {
    let cfg = config::config()?;
    if !cfg.schedule.enabled {
        anyhow::bail!(
            "Scheduled backups are disabled. Set {}=true or backup.enabled in config.yaml",
            config::ENV_BACKUP_ENABLED
        );
    }

    let scheduler = BackupScheduler::new(build_orchestrator(cfg)?, cfg.schedule.clone());
    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await;

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("dumpwarden configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  Backups: {}", cfg.backup_dir.display());
    println!("  Records: {}", cfg.records_path.display());
    println!("  Lock:    {}", cfg.lock_path.display());
    println!();
    println!(
        "Database URL: {}",
        if cfg.database_url.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!();
    println!("Schedule:");
    println!("  Enabled:      {}", cfg.schedule.enabled);
    println!("  Run at (UTC): {}", cfg.schedule.run_at.format("%H:%M"));
    println!("  Max retained: {}", cfg.schedule.max_retained);
    println!();
    println!("Dump:");
    println!("  Binary:          {}", cfg.dump.dump_binary);
    println!("  Container:       {} ({})", cfg.dump.container_runtime, cfg.dump.container_image);
    println!("  Probe timeout:   {:?}", cfg.dump.probe_timeout);
    println!("  Output buffer:   {} bytes", cfg.dump.max_output_bytes);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert!(parse_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(parse_id("not-a-uuid").is_err());
    }

    #[test]
    fn test_cli_parses_prune_keep() {
        let cli = Cli::try_parse_from(["dumpwarden", "prune", "--keep", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Prune { keep: Some(5) }));
    }
}
