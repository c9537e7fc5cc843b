//! Backup data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::store::DataCategory;

/// Keep this many backups when `auto_delete_old_backups` is set
pub const MAX_RETAINED_BACKUPS: usize = 10;

const DEFAULT_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Longest allowed automatic backup interval (30 days)
pub const MAX_INTERVAL_MS: u64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Complete,
    Partial,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "complete" => Self::Complete,
            "partial" => Self::Partial,
            _ => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupLocation {
    Local,
    Cloud,
}

impl fmt::Display for BackupLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        })
    }
}

/// One finished backup run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: BackupStatus,
    pub categories: Vec<DataCategory>,
    /// Compressed bytes of the stored snapshots
    pub size: u64,
    pub location: Vec<BackupLocation>,
}

impl BackupMetadata {
    pub fn stored_in(&self, location: BackupLocation) -> bool {
        self.location.contains(&location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    pub enabled: bool,
    /// Milliseconds between automatic backups
    pub interval: u64,
    pub store_local: bool,
    pub store_cloud: bool,
    #[serde(default)]
    pub auto_delete_old_backups: bool,
}

impl BackupSettings {
    pub fn interval_duration(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval == 0 || self.interval > MAX_INTERVAL_MS {
            return Err(format!(
                "interval must be 1-{} milliseconds (30 days), got {}",
                MAX_INTERVAL_MS, self.interval
            ));
        }
        Ok(())
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_INTERVAL_MS,
            store_local: true,
            store_cloud: false,
            auto_delete_old_backups: false,
        }
    }
}

/// A (category, location) pair that could not be backed up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFailure {
    pub category: DataCategory,
    /// `None` when the category could not be read at all
    pub location: Option<BackupLocation>,
    pub reason: String,
}

impl fmt::Display for BackupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => write!(f, "{} -> {}: {}", self.category, location, self.reason),
            None => write!(f, "{}: {}", self.category, self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReport {
    pub metadata: BackupMetadata,
    pub failures: Vec<BackupFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFailure {
    pub category: DataCategory,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub success: bool,
    pub restored_categories: Vec<DataCategory>,
    pub failed_categories: Vec<DataCategory>,
    pub errors: Vec<CategoryFailure>,
}

impl RestoreResult {
    /// Shape returned when nothing could be restored at all
    pub fn all_failed(reason: &str) -> Self {
        Self {
            success: false,
            restored_categories: Vec::new(),
            failed_categories: DataCategory::ALL.to_vec(),
            errors: DataCategory::ALL
                .iter()
                .map(|&category| CategoryFailure {
                    category,
                    reason: reason.to_string(),
                })
                .collect(),
        }
    }
}

/// Outcome of the most recent automatic backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBackupState {
    pub last_run_at: DateTime<Utc>,
    pub status: BackupStatus,
    pub backup_id: Option<String>,
    pub error: Option<String>,
}
