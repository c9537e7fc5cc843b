//! Backup Module - point-in-time snapshots, restore and automatic backups

pub mod auto;
pub mod manager;
pub mod models;

pub use auto::AutoBackupScheduler;
pub use manager::{BackupError, BackupManager};
pub use models::{
    AutoBackupState, BackupFailure, BackupLocation, BackupMetadata, BackupReport, BackupSettings,
    BackupStatus, CategoryFailure, RestoreResult, MAX_INTERVAL_MS, MAX_RETAINED_BACKUPS,
};
