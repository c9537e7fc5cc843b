//! Backup Manager - point-in-time snapshots of every data category
//!
//! Each run seals the current record of every category (gzip JSON plus a
//! SHA-256 hash) and stores it in the enabled locations:
//! - Local: the `backup_snapshots` table
//! - Cloud: the remote store's snapshot endpoint
//!
//! Metadata rows in `backups` list what each run stored and where.

use chrono::{SubsecRound, Utc};
use rusqlite::params;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::models::{
    AutoBackupState, BackupFailure, BackupLocation, BackupMetadata, BackupReport, BackupSettings,
    BackupStatus, CategoryFailure, RestoreResult, MAX_RETAINED_BACKUPS,
};
use crate::codec::{self, CodecError, SealedSnapshot};
use crate::db::{format_timestamp, parse_timestamp, Database, DbError};
use crate::scheduler::SchedulerError;
use crate::store::{DataCategory, PersistentStore, RemoteStore, VersionedRecord};
use crate::sync::{SyncError, SyncManager};

const SETTINGS_KEY: &str = "backup_settings";
const AUTO_STATE_KEY: &str = "auto_backup_state";

pub struct BackupManager {
    db: Arc<Database>,
    sync: Arc<SyncManager>,
}

impl BackupManager {
    pub fn new(db: Arc<Database>, sync: Arc<SyncManager>) -> Self {
        Self { db, sync }
    }

    fn store(&self) -> &Arc<PersistentStore> {
        self.sync.store()
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn get_settings(&self) -> BackupSettings {
        match self.db.get_setting::<BackupSettings>(SETTINGS_KEY) {
            Ok(Some(settings)) => settings,
            Ok(None) => BackupSettings::default(),
            Err(e) => {
                log::error!("Failed to read backup settings, using defaults: {}", e);
                BackupSettings::default()
            }
        }
    }

    /// Replace the backup settings
    pub fn update_settings(&self, settings: &BackupSettings) -> Result<(), BackupError> {
        settings.validate().map_err(BackupError::InvalidSettings)?;
        self.db.set_setting(SETTINGS_KEY, settings)?;

        log::info!(
            "Backup settings updated (enabled: {}, interval: {} ms, local: {}, cloud: {})",
            settings.enabled,
            settings.interval,
            settings.store_local,
            settings.store_cloud
        );
        Ok(())
    }

    pub fn last_auto_backup(&self) -> Option<AutoBackupState> {
        self.db.get_setting(AUTO_STATE_KEY).unwrap_or_else(|e| {
            log::warn!("Failed to read auto-backup state: {}", e);
            None
        })
    }

    pub(crate) fn record_auto_backup(&self, state: &AutoBackupState) -> Result<(), BackupError> {
        self.db.set_setting(AUTO_STATE_KEY, state)?;
        Ok(())
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Every backup, newest first; empty on failure
    pub fn get_backup_list(&self) -> Vec<BackupMetadata> {
        match self.list_backups() {
            Ok(list) => list,
            Err(e) => {
                log::error!("Failed to list backups: {}", e);
                Vec::new()
            }
        }
    }

    fn list_backups(&self) -> Result<Vec<BackupMetadata>, BackupError> {
        Ok(self.db.query(
            "SELECT id, created_at, status, categories, size_bytes, locations
             FROM backups ORDER BY created_at DESC, rowid DESC",
            [],
            map_metadata,
        )?)
    }

    pub fn get_backup(&self, id: &str) -> Result<Option<BackupMetadata>, BackupError> {
        Ok(self.db.query_optional(
            "SELECT id, created_at, status, categories, size_bytes, locations
             FROM backups WHERE id = ?1",
            params![id],
            map_metadata,
        )?)
    }

    // ========================================================================
    // Backup
    // ========================================================================

    /// Snapshot every category that holds data into every enabled location
    pub async fn perform_backup(&self) -> Result<BackupReport, BackupError> {
        let settings = self.get_settings();

        let mut locations = Vec::new();
        if settings.store_local {
            locations.push(BackupLocation::Local);
        }
        if settings.store_cloud {
            locations.push(BackupLocation::Cloud);
        }
        if locations.is_empty() {
            log::warn!("Backup skipped: no storage location enabled");
            return Err(BackupError::NoLocationsEnabled);
        }

        let mut failures = Vec::new();
        let mut sealed = Vec::new();

        for category in DataCategory::ALL {
            match self.store().load(category).await {
                Ok(Some(record)) => match codec::seal(&record) {
                    Ok(snapshot) => sealed.push((record, snapshot)),
                    Err(e) => failures.push(BackupFailure {
                        category,
                        location: None,
                        reason: e.to_string(),
                    }),
                },
                Ok(None) => {}
                Err(e) => failures.push(BackupFailure {
                    category,
                    location: None,
                    reason: e.to_string(),
                }),
            }
        }

        if sealed.is_empty() {
            if failures.is_empty() {
                log::info!("Backup skipped: no category holds data");
                return Err(BackupError::NothingToBackUp);
            }
            log::error!("Backup failed: no category could be read");
            return Err(BackupError::AllFailed(failures));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let remote = self.store().remote();

        let mut stored_categories = BTreeSet::new();
        let mut used_locations = BTreeSet::new();
        let mut size = 0u64;

        for (record, snapshot) in &sealed {
            let mut stored = false;

            for &location in &locations {
                let outcome = match location {
                    BackupLocation::Local => self.insert_local_snapshot(&id, record, snapshot),
                    BackupLocation::Cloud => match &remote {
                        Some(remote) => remote
                            .put_snapshot(&id, record.category, snapshot)
                            .await
                            .map_err(|e| e.to_string()),
                        None => Err("remote storage is not configured".to_string()),
                    },
                };

                match outcome {
                    Ok(()) => {
                        stored = true;
                        used_locations.insert(location);
                    }
                    Err(reason) => {
                        log::warn!("Backup of {} to {} failed: {}", record.category, location, reason);
                        failures.push(BackupFailure {
                            category: record.category,
                            location: Some(location),
                            reason,
                        });
                    }
                }
            }

            if stored {
                stored_categories.insert(record.category);
                size += snapshot.payload.len() as u64;
            }
        }

        if stored_categories.is_empty() {
            log::error!("Backup {} failed for every category", id);
            return Err(BackupError::AllFailed(failures));
        }

        let status = if failures.is_empty() {
            BackupStatus::Complete
        } else {
            BackupStatus::Partial
        };

        let metadata = BackupMetadata {
            id: id.clone(),
            // Stored at microsecond precision
            timestamp: Utc::now().trunc_subsecs(6),
            status,
            categories: stored_categories.into_iter().collect(),
            size,
            location: used_locations.into_iter().collect(),
        };

        if let Err(e) = self.insert_metadata(&metadata) {
            log::error!("Failed to record backup {}: {}", id, e);
            self.discard_snapshots(&metadata).await;
            return Err(e);
        }

        log::info!(
            "Backup {} {} ({} categories, {} bytes, {} failure(s))",
            id,
            status.as_str(),
            metadata.categories.len(),
            size,
            failures.len()
        );

        if settings.auto_delete_old_backups {
            if let Err(e) = self.prune_old_backups(MAX_RETAINED_BACKUPS).await {
                log::warn!("Failed to prune old backups: {}", e);
            }
        }

        Ok(BackupReport { metadata, failures })
    }

    fn insert_local_snapshot(
        &self,
        backup_id: &str,
        record: &VersionedRecord,
        snapshot: &SealedSnapshot,
    ) -> Result<(), String> {
        self.db
            .execute(
                "INSERT INTO backup_snapshots (backup_id, category, version, payload, snapshot_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    backup_id,
                    record.category.as_str(),
                    record.version,
                    snapshot.payload,
                    snapshot.hash
                ],
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn insert_metadata(&self, metadata: &BackupMetadata) -> Result<(), BackupError> {
        let categories = serde_json::to_string(&metadata.categories)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        let locations = serde_json::to_string(&metadata.location)
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        self.db.execute(
            "INSERT INTO backups (id, created_at, status, categories, size_bytes, locations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                metadata.id,
                format_timestamp(&metadata.timestamp),
                metadata.status.as_str(),
                categories,
                metadata.size as i64,
                locations
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // Restore
    // ========================================================================

    /// Restore every category of a backup as a new local version
    pub async fn restore_backup(&self, id: &str) -> RestoreResult {
        let metadata = match self.get_backup(id) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                log::warn!("Restore requested for unknown backup {}", id);
                return RestoreResult::all_failed("backup not found");
            }
            Err(e) => {
                log::error!("Failed to look up backup {}: {}", id, e);
                return RestoreResult::all_failed(&e.to_string());
            }
        };

        let mut restored_categories = Vec::new();
        let mut failed_categories = Vec::new();
        let mut errors = Vec::new();

        for &category in &metadata.categories {
            match self.restore_category(&metadata, category).await {
                Ok(record) => {
                    log::info!("Restored {} from backup {} as v{}", category, id, record.version);
                    restored_categories.push(category);
                }
                Err(e) => {
                    log::warn!("Failed to restore {} from backup {}: {}", category, id, e);
                    failed_categories.push(category);
                    errors.push(CategoryFailure {
                        category,
                        reason: e.to_string(),
                    });
                }
            }
        }

        RestoreResult {
            success: failed_categories.is_empty(),
            restored_categories,
            failed_categories,
            errors,
        }
    }

    async fn restore_category(
        &self,
        metadata: &BackupMetadata,
        category: DataCategory,
    ) -> Result<VersionedRecord, BackupError> {
        let snapshot = self.load_snapshot(metadata, category).await?;
        Ok(self.sync.commit_local(category, snapshot.data).await?)
    }

    /// Local snapshot first, cloud copy when the local one is missing or damaged
    async fn load_snapshot(
        &self,
        metadata: &BackupMetadata,
        category: DataCategory,
    ) -> Result<VersionedRecord, BackupError> {
        let mut last_error = BackupError::SnapshotMissing(category);

        if metadata.stored_in(BackupLocation::Local) {
            match self.local_snapshot(&metadata.id, category) {
                Ok(Some(record)) => return Ok(record),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Local snapshot of {} in {} unusable: {}", category, metadata.id, e);
                    last_error = e;
                }
            }
        }

        if metadata.stored_in(BackupLocation::Cloud) {
            if let Some(remote) = self.store().remote() {
                match remote.fetch_snapshot(&metadata.id, category).await {
                    Ok(Some(snapshot)) => {
                        return verify_snapshot(category, &snapshot.payload, &snapshot.hash);
                    }
                    Ok(None) => {}
                    Err(e) => last_error = BackupError::Cloud(e.to_string()),
                }
            }
        }

        Err(last_error)
    }

    fn local_snapshot(
        &self,
        backup_id: &str,
        category: DataCategory,
    ) -> Result<Option<VersionedRecord>, BackupError> {
        let row = self.db.query_optional(
            "SELECT payload, snapshot_hash FROM backup_snapshots
             WHERE backup_id = ?1 AND category = ?2",
            params![backup_id, category.as_str()],
            |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)),
        )?;

        match row {
            Some((payload, hash)) => verify_snapshot(category, &payload, &hash).map(Some),
            None => Ok(None),
        }
    }

    /// Newest valid snapshot of a category across all backups
    pub async fn latest_snapshot(&self, category: DataCategory) -> Option<VersionedRecord> {
        for metadata in self.get_backup_list() {
            if !metadata.categories.contains(&category) {
                continue;
            }
            match self.load_snapshot(&metadata, category).await {
                Ok(record) => return Some(record),
                Err(e) => log::debug!("Skipping backup {} for {}: {}", metadata.id, category, e),
            }
        }
        None
    }

    // ========================================================================
    // Delete
    // ========================================================================

    pub async fn delete_backup(&self, id: &str) -> Result<(), BackupError> {
        let metadata = self
            .get_backup(id)?
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;

        {
            let mut conn = self.db.get_conn()?;
            let tx = conn.transaction().map_err(DbError::from)?;
            tx.execute("DELETE FROM backup_snapshots WHERE backup_id = ?1", params![id])
                .map_err(DbError::from)?;
            tx.execute("DELETE FROM backups WHERE id = ?1", params![id])
                .map_err(DbError::from)?;
            tx.commit().map_err(DbError::from)?;
        }

        if metadata.stored_in(BackupLocation::Cloud) {
            self.delete_cloud_copy(id).await;
        }

        log::info!("Deleted backup {}", id);
        Ok(())
    }

    /// Delete all but the newest `keep` backups
    pub async fn prune_old_backups(&self, keep: usize) -> Result<usize, BackupError> {
        let stale: Vec<String> = self
            .list_backups()?
            .into_iter()
            .skip(keep)
            .map(|metadata| metadata.id)
            .collect();

        for id in &stale {
            self.delete_backup(id).await?;
        }

        if !stale.is_empty() {
            log::info!("Pruned {} old backup(s)", stale.len());
        }
        Ok(stale.len())
    }

    async fn discard_snapshots(&self, metadata: &BackupMetadata) {
        if let Err(e) = self.db.execute(
            "DELETE FROM backup_snapshots WHERE backup_id = ?1",
            params![metadata.id],
        ) {
            log::warn!("Failed to discard local snapshots of {}: {}", metadata.id, e);
        }
        if metadata.stored_in(BackupLocation::Cloud) {
            self.delete_cloud_copy(&metadata.id).await;
        }
    }

    async fn delete_cloud_copy(&self, id: &str) {
        let Some(remote) = self.store().remote() else {
            log::warn!("Cloud copy of backup {} kept: remote storage is not configured", id);
            return;
        };
        if let Err(e) = remote.delete_snapshots(id).await {
            log::warn!("Failed to delete cloud copy of backup {}: {}", id, e);
        }
    }
}

fn verify_snapshot(
    category: DataCategory,
    payload: &[u8],
    hash: &str,
) -> Result<VersionedRecord, BackupError> {
    let record: VersionedRecord = codec::open(payload, hash)?;

    if record.category != category {
        return Err(BackupError::SnapshotMismatch(format!(
            "expected {}, snapshot holds {}",
            category, record.category
        )));
    }
    if !record.is_intact() {
        return Err(BackupError::SnapshotMismatch(format!(
            "{} v{} fails its checksum",
            category, record.version
        )));
    }
    Ok(record)
}

fn map_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<BackupMetadata> {
    Ok(BackupMetadata {
        id: row.get(0)?,
        timestamp: parse_timestamp(&row.get::<_, String>(1)?)?,
        status: BackupStatus::from_str(&row.get::<_, String>(2)?),
        categories: json_column(row, 3)?,
        size: row.get::<_, i64>(4)?.max(0) as u64,
        location: json_column(row, 5)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("No backup location is enabled")]
    NoLocationsEnabled,

    #[error("No category holds data to back up")]
    NothingToBackUp,

    #[error("Backup failed for every category ({} failure(s))", .0.len())]
    AllFailed(Vec<BackupFailure>),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Invalid backup settings: {0}")]
    InvalidSettings(String),

    #[error("No snapshot of {0} in this backup")]
    SnapshotMissing(DataCategory),

    #[error("Snapshot rejected: {0}")]
    SnapshotMismatch(String),

    #[error("Cloud snapshot unavailable: {0}")]
    Cloud(String),

    #[error("Snapshot decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DatabaseTier, LocalTier, RecordCache};
    use crate::sync::ListenerRegistry;
    use crate::test_utils::MemoryRemote;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        manager: BackupManager,
        sync: Arc<SyncManager>,
        db: Arc<Database>,
        remote: Arc<MemoryRemote>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(PersistentStore::new(
            Arc::new(LocalTier::new(temp.path().join("local")).unwrap()),
            Arc::new(DatabaseTier::new(db.clone())),
            Some(remote.clone() as Arc<dyn RemoteStore>),
            RecordCache::new(),
        ));
        let sync = Arc::new(SyncManager::new(db.clone(), store, ListenerRegistry::new()));
        Fixture {
            manager: BackupManager::new(db.clone(), sync.clone()),
            sync,
            db,
            remote,
            _temp: temp,
        }
    }

    fn enable(fx: &Fixture, local: bool, cloud: bool, auto_delete: bool) {
        fx.manager
            .update_settings(&BackupSettings {
                enabled: false,
                interval: 60_000,
                store_local: local,
                store_cloud: cloud,
                auto_delete_old_backups: auto_delete,
            })
            .unwrap();
    }

    #[test]
    fn test_default_settings_when_unset() {
        let fx = fixture();
        assert_eq!(fx.manager.get_settings(), BackupSettings::default());
    }

    #[test]
    fn test_update_settings_rejects_zero_interval() {
        let fx = fixture();
        let settings = BackupSettings {
            interval: 0,
            ..BackupSettings::default()
        };
        assert!(matches!(
            fx.manager.update_settings(&settings),
            Err(BackupError::InvalidSettings(_))
        ));
        assert_eq!(fx.manager.get_settings(), BackupSettings::default());
    }

    #[tokio::test]
    async fn test_no_location_enabled() {
        let fx = fixture();
        enable(&fx, false, false, false);
        fx.sync.commit_local(DataCategory::Clients, json!([])).await.unwrap();

        assert!(matches!(
            fx.manager.perform_backup().await,
            Err(BackupError::NoLocationsEnabled)
        ));
        assert!(fx.manager.get_backup_list().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_back_up() {
        let fx = fixture();
        assert!(matches!(
            fx.manager.perform_backup().await,
            Err(BackupError::NothingToBackUp)
        ));
        assert!(fx.manager.get_backup_list().is_empty());
    }

    #[tokio::test]
    async fn test_complete_backup_to_both_locations() {
        let fx = fixture();
        enable(&fx, true, true, false);
        fx.sync.commit_local(DataCategory::Clients, json!([{"id": "c1"}])).await.unwrap();
        fx.sync.commit_local(DataCategory::Invoices, json!([{"id": "i1"}])).await.unwrap();

        let report = fx.manager.perform_backup().await.unwrap();

        assert_eq!(report.metadata.status, BackupStatus::Complete);
        assert!(report.failures.is_empty());
        assert_eq!(
            report.metadata.categories,
            vec![DataCategory::Clients, DataCategory::Invoices]
        );
        assert_eq!(
            report.metadata.location,
            vec![BackupLocation::Local, BackupLocation::Cloud]
        );
        assert!(report.metadata.size > 0);
        assert_eq!(fx.remote.snapshot_count(), 2);
        assert_eq!(fx.manager.get_backup_list(), vec![report.metadata]);
    }

    #[tokio::test]
    async fn test_cloud_only_offline_fails_entirely() {
        let fx = fixture();
        enable(&fx, false, true, false);
        fx.remote.set_online(false);
        fx.sync.commit_local(DataCategory::Quotes, json!([])).await.unwrap();

        match fx.manager.perform_backup().await {
            Err(BackupError::AllFailed(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].location, Some(BackupLocation::Cloud));
            }
            other => panic!("expected AllFailed, got {:?}", other.map(|r| r.metadata.status)),
        }
        assert!(fx.manager.get_backup_list().is_empty());
    }

    #[tokio::test]
    async fn test_restore_creates_new_version() {
        let fx = fixture();
        enable(&fx, true, false, false);
        fx.sync.commit_local(DataCategory::Company, json!({"name": "Acme"})).await.unwrap();
        let report = fx.manager.perform_backup().await.unwrap();

        fx.sync.commit_local(DataCategory::Company, json!({"name": "Changed"})).await.unwrap();

        let result = fx.manager.restore_backup(&report.metadata.id).await;
        assert!(result.success);
        assert_eq!(result.restored_categories, vec![DataCategory::Company]);

        let current = fx.sync.store().load(DataCategory::Company).await.unwrap().unwrap();
        assert_eq!(current.data, json!({"name": "Acme"}));
        assert_eq!(current.version, 3);
    }

    #[tokio::test]
    async fn test_restore_falls_back_to_cloud_when_local_damaged() {
        let fx = fixture();
        enable(&fx, true, true, false);
        fx.sync.commit_local(DataCategory::Templates, json!(["t1"])).await.unwrap();
        let report = fx.manager.perform_backup().await.unwrap();

        fx.db
            .execute(
                "UPDATE backup_snapshots SET snapshot_hash = 'bad' WHERE backup_id = ?1",
                params![report.metadata.id],
            )
            .unwrap();

        let result = fx.manager.restore_backup(&report.metadata.id).await;
        assert!(result.success, "errors: {:?}", result.errors);
    }

    #[tokio::test]
    async fn test_restore_continues_past_damaged_category() {
        let fx = fixture();
        enable(&fx, true, true, false);
        fx.sync.commit_local(DataCategory::Clients, json!([{"id": "c1"}])).await.unwrap();
        fx.sync.commit_local(DataCategory::Invoices, json!([{"id": "i1"}])).await.unwrap();
        let report = fx.manager.perform_backup().await.unwrap();

        fx.db
            .execute(
                "UPDATE backup_snapshots SET snapshot_hash = 'bad'
                 WHERE backup_id = ?1 AND category = ?2",
                params![report.metadata.id, DataCategory::Invoices.as_str()],
            )
            .unwrap();
        fx.remote.set_online(false);

        let result = fx.manager.restore_backup(&report.metadata.id).await;

        assert!(!result.success);
        assert_eq!(result.restored_categories, vec![DataCategory::Clients]);
        assert_eq!(result.failed_categories, vec![DataCategory::Invoices]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, DataCategory::Invoices);
    }

    #[tokio::test]
    async fn test_restore_unknown_backup() {
        let fx = fixture();
        let result = fx.manager.restore_backup("does-not-exist").await;

        assert!(!result.success);
        assert!(result.restored_categories.is_empty());
        assert_eq!(result.failed_categories, DataCategory::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_delete_removes_local_and_cloud_copies() {
        let fx = fixture();
        enable(&fx, true, true, false);
        fx.sync.commit_local(DataCategory::Clients, json!([])).await.unwrap();
        let report = fx.manager.perform_backup().await.unwrap();

        fx.manager.delete_backup(&report.metadata.id).await.unwrap();

        assert!(fx.manager.get_backup_list().is_empty());
        assert_eq!(fx.remote.snapshot_count(), 0);
        let remaining: i64 = fx
            .db
            .query_row("SELECT COUNT(*) FROM backup_snapshots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_backup() {
        let fx = fixture();
        assert!(matches!(
            fx.manager.delete_backup("missing").await,
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_delete_keeps_newest() {
        let fx = fixture();
        enable(&fx, true, false, true);
        fx.sync.commit_local(DataCategory::Settings, json!({})).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..(MAX_RETAINED_BACKUPS + 2) {
            ids.push(fx.manager.perform_backup().await.unwrap().metadata.id);
        }

        let list = fx.manager.get_backup_list();
        assert_eq!(list.len(), MAX_RETAINED_BACKUPS);
        assert_eq!(list[0].id, *ids.last().unwrap());
        assert!(list.iter().all(|m| m.id != ids[0] && m.id != ids[1]));
    }

    #[tokio::test]
    async fn test_latest_snapshot_prefers_newest_backup() {
        let fx = fixture();
        enable(&fx, true, false, false);

        fx.sync.commit_local(DataCategory::Clients, json!(["old"])).await.unwrap();
        fx.manager.perform_backup().await.unwrap();
        fx.sync.commit_local(DataCategory::Clients, json!(["new"])).await.unwrap();
        fx.manager.perform_backup().await.unwrap();

        let latest = fx.manager.latest_snapshot(DataCategory::Clients).await.unwrap();
        assert_eq!(latest.data, json!(["new"]));
        assert!(fx.manager.latest_snapshot(DataCategory::TaxDocuments).await.is_none());
    }
}
