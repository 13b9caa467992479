//! Background upkeep: periodic database backups and health snapshots,
//! fully decoupled from request handling. A failing tick is logged and
//! recorded as an alert; it never touches a conversation.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

use crate::config::MaintenanceConfig;
use crate::storage::database::Database;
use crate::types::now_timestamp;

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub cpu_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
}

pub struct SystemMaintenance {
    db: Arc<Database>,
    /// The live SQLite file that gets copied on backup.
    db_file: PathBuf,
    backup_dir: PathBuf,
    backup_keep: usize,
}

impl SystemMaintenance {
    pub fn new(db: Arc<Database>, db_file: PathBuf, data_dir: PathBuf, config: &MaintenanceConfig) -> Self {
        Self {
            db,
            db_file,
            backup_dir: data_dir.join("backups"),
            backup_keep: config.backup_keep,
        }
    }

    /// Copy the database file to a timestamped path and record it. Old
    /// backups past the retention count are pruned best effort.
    pub fn backup(&self, kind: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.backup_dir)
            .with_context(|| format!("Failed to create {}", self.backup_dir.display()))?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let dest = self.backup_dir.join(format!("backup_{}.db", stamp));
        std::fs::copy(&self.db_file, &dest).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                self.db_file.display(),
                dest.display()
            )
        })?;

        self.db
            .insert_backup(&dest.display().to_string(), kind, &now_timestamp())?;
        tracing::info!(path = %dest.display(), kind = %kind, "Database backed up");

        self.prune_old_backups();
        Ok(dest)
    }

    fn prune_old_backups(&self) {
        let Ok(mut entries) = std::fs::read_dir(&self.backup_dir).map(|d| {
            d.filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("backup_"))
                        .unwrap_or(false)
                })
                .collect::<Vec<_>>()
        }) else {
            return;
        };
        // Timestamped names sort chronologically.
        entries.sort();
        while entries.len() > self.backup_keep {
            let oldest = entries.remove(0);
            if let Err(e) = std::fs::remove_file(&oldest) {
                tracing::warn!(path = %oldest.display(), error = %e, "Backup prune failed");
            }
        }
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        HealthSnapshot {
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            memory_used_mb: sys.used_memory() / 1024 / 1024,
            memory_total_mb: sys.total_memory() / 1024 / 1024,
        }
    }

    fn run_tick(&self) -> Result<()> {
        let health = self.health_snapshot();
        tracing::debug!(
            cpu = health.cpu_percent,
            mem_used_mb = health.memory_used_mb,
            "Maintenance tick"
        );

        if health.memory_total_mb > 0 {
            let mem_ratio = health.memory_used_mb as f64 / health.memory_total_mb as f64;
            if mem_ratio > 0.9 {
                self.db.insert_alert(
                    "warning",
                    &format!("Memory usage at {:.0}%", mem_ratio * 100.0),
                    &now_timestamp(),
                )?;
            }
        }

        self.backup("periodic")?;
        Ok(())
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<(String, String, String)>> {
        self.db.recent_alerts(limit)
    }

    pub fn recent_backups(&self, limit: usize) -> Result<Vec<(String, String, String)>> {
        self.db.recent_backups(limit)
    }

    /// Start the periodic loop. Each tick runs inside its own error
    /// boundary; failures become alert rows, not crashes.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of `interval` fires immediately; skip it so
            // startup does not trigger a backup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let this = self.clone();
                let result = tokio::task::spawn_blocking(move || this.run_tick()).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Maintenance tick failed");
                        let _ = self.db.insert_alert(
                            "error",
                            &format!("Maintenance tick failed: {}", e),
                            &now_timestamp(),
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Maintenance task panicked");
                    }
                }
            }
        })
    }
}
