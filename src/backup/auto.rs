//! Automatic backups
//!
//! Runs `perform_backup` on the interval from `BackupSettings` while the
//! settings have `enabled` set. The outcome of every run is persisted so the
//! caller can show when the last automatic backup happened.

use chrono::Utc;
use std::sync::Arc;

use super::manager::{BackupError, BackupManager};
use super::models::{AutoBackupState, BackupSettings, BackupStatus};
use crate::scheduler::PeriodicTask;

pub struct AutoBackupScheduler {
    manager: Arc<BackupManager>,
    task: PeriodicTask,
}

impl AutoBackupScheduler {
    pub fn new(manager: Arc<BackupManager>) -> Self {
        Self {
            manager,
            task: PeriodicTask::new("auto-backup"),
        }
    }

    /// Start from the stored settings; `false` when automatic backups are off
    pub fn start(&self) -> Result<bool, BackupError> {
        let settings = self.manager.get_settings();
        if !settings.enabled {
            log::info!("Automatic backups are disabled");
            return Ok(false);
        }

        let manager = self.manager.clone();
        self.task.start(settings.interval_duration(), move || {
            let manager = manager.clone();
            async move {
                run_once(&manager).await;
            }
        })?;

        log::info!("Automatic backups every {} ms", settings.interval);
        Ok(true)
    }

    /// Stop scheduling; a backup already in progress still completes
    pub fn stop(&self) -> Result<(), BackupError> {
        if self.task.is_running() {
            self.task.stop()?;
        }
        Ok(())
    }

    /// Stop and wait for a backup in progress to finish
    pub async fn shutdown(&self) -> Result<(), BackupError> {
        if self.task.is_running() {
            self.task.stop_and_wait().await?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Persist new settings and reschedule accordingly
    pub fn update_settings(&self, settings: &BackupSettings) -> Result<bool, BackupError> {
        self.manager.update_settings(settings)?;
        self.stop()?;
        self.start()
    }

    pub fn last_run(&self) -> Option<AutoBackupState> {
        self.manager.last_auto_backup()
    }
}

/// One automatic run; failures are recorded, never propagated
pub async fn run_once(manager: &BackupManager) -> AutoBackupState {
    let state = match manager.perform_backup().await {
        Ok(report) => AutoBackupState {
            last_run_at: Utc::now(),
            status: report.metadata.status,
            backup_id: Some(report.metadata.id),
            error: None,
        },
        Err(BackupError::NothingToBackUp) => {
            log::debug!("Automatic backup found nothing to back up");
            AutoBackupState {
                last_run_at: Utc::now(),
                status: BackupStatus::Complete,
                backup_id: None,
                error: None,
            }
        }
        Err(e) => {
            log::error!("Automatic backup failed: {}", e);
            AutoBackupState {
                last_run_at: Utc::now(),
                status: BackupStatus::Failed,
                backup_id: None,
                error: Some(e.to_string()),
            }
        }
    };

    if let Err(e) = manager.record_auto_backup(&state) {
        log::warn!("Failed to record automatic backup outcome: {}", e);
    }
    state
}
