//! Persistent Store - multi-tier storage of versioned category records
//!
//! Tiers:
//! - Local: JSON documents in the data directory (primary)
//! - Database: SQLite records table (mirror of the primary)
//! - Remote: optional cloud store, reached through [`RemoteStore`]
//!
//! Reads verify checksums and fall back from the local tier to the database
//! tier when the primary copy is missing or corrupted.

pub mod cache;
pub mod database;
pub mod local;
pub mod models;
pub mod remote;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use cache::{CacheStats, RecordCache, RecordCacheConfig};
pub use database::DatabaseTier;
pub use local::LocalTier;
pub use models::{
    checksum_of, DataCategory, HealthStatus, StorageTier, StorageTypes, UnknownCategory,
    VersionedRecord,
};
pub use remote::{HttpRemote, RemoteError, RemoteStore};

use crate::db::DbError;

/// A local storage tier holding one record per category
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn tier(&self) -> StorageTier;

    async fn read(&self, category: DataCategory) -> Result<Option<VersionedRecord>, StoreError>;

    async fn write(&self, record: &VersionedRecord) -> Result<(), StoreError>;

    async fn remove(&self, category: DataCategory) -> Result<(), StoreError>;

    /// Round-trip a trivial operation to prove the tier is usable
    async fn probe(&self) -> Result<(), StoreError>;
}

pub struct PersistentStore {
    local: Arc<dyn StorageBackend>,
    database: Arc<dyn StorageBackend>,
    remote: Option<Arc<dyn RemoteStore>>,
    cache: RecordCache,
    /// Serializes saves so versions stay monotonic
    write_lock: Mutex<()>,
}

impl PersistentStore {
    pub fn new(
        local: Arc<dyn StorageBackend>,
        database: Arc<dyn StorageBackend>,
        remote: Option<Arc<dyn RemoteStore>>,
        cache: RecordCache,
    ) -> Self {
        Self {
            local,
            database,
            remote,
            cache,
            write_lock: Mutex::new(()),
        }
    }

    pub fn remote(&self) -> Option<Arc<dyn RemoteStore>> {
        self.remote.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Load the current record for a category
    ///
    /// Returns `Ok(None)` only when every tier reports the category absent.
    pub async fn load(&self, category: DataCategory) -> Result<Option<VersionedRecord>, StoreError> {
        if let Some(record) = self.cache.get(category).await {
            return Ok(Some(record));
        }

        let mut last_error = None;

        for tier in [&self.local, &self.database] {
            match tier.read(category).await {
                Ok(Some(record)) if record.is_intact() => {
                    self.cache.insert(record.clone()).await;
                    return Ok(Some(record));
                }
                Ok(Some(record)) => {
                    log::warn!(
                        "{} copy of {} v{} failed its integrity check",
                        tier.tier(),
                        category,
                        record.version
                    );
                    last_error = Some(StoreError::Corrupted {
                        tier: tier.tier(),
                        category,
                        reason: "checksum mismatch".to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Failed to read {} from {} tier: {}", category, tier.tier(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Read a category from one specific tier, without integrity filtering
    pub async fn load_from(
        &self,
        tier: StorageTier,
        category: DataCategory,
    ) -> Result<Option<VersionedRecord>, StoreError> {
        match tier {
            StorageTier::Local => self.local.read(category).await,
            StorageTier::Database => self.database.read(category).await,
            StorageTier::Remote => match &self.remote {
                Some(remote) => Ok(remote.fetch_record(category).await?),
                None => Err(StoreError::RemoteNotConfigured),
            },
        }
    }

    /// Save new content for a category as the next version
    pub async fn save(
        &self,
        category: DataCategory,
        data: serde_json::Value,
    ) -> Result<VersionedRecord, StoreError> {
        let _guard = self.write_lock.lock().await;

        let current = self.highest_version(category).await;
        let record = VersionedRecord::new(category, current + 1, data);
        self.write_tiers(&record).await?;

        log::info!("Saved {} v{}", category, record.version);
        Ok(record)
    }

    /// Write an existing record to the local tiers, keeping its version
    pub async fn write_local(&self, record: &VersionedRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_tiers(record).await
    }

    async fn highest_version(&self, category: DataCategory) -> i64 {
        let mut highest = 0;
        for tier in [&self.local, &self.database] {
            if let Ok(Some(record)) = tier.read(category).await {
                highest = highest.max(record.version);
            }
        }
        highest
    }

    async fn write_tiers(&self, record: &VersionedRecord) -> Result<(), StoreError> {
        self.cache.invalidate(record.category).await;

        let local = self.local.write(record).await;
        let database = self.database.write(record).await;

        match (local, database) {
            (Ok(()), Ok(())) => {}
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                log::warn!("Partial write of {}: {}", record.category, e);
            }
            (Err(local_err), Err(database_err)) => {
                log::error!(
                    "Failed to write {} to any local tier: {} / {}",
                    record.category,
                    local_err,
                    database_err
                );
                return Err(StoreError::AllTiersFailed(format!(
                    "local: {}; database: {}",
                    local_err, database_err
                )));
            }
        }

        self.cache.insert(record.clone()).await;
        Ok(())
    }

    /// Probe every tier and check local records for corruption
    pub async fn validate_health(&self) -> HealthStatus {
        let mut issues = Vec::new();

        let remote_probe = async {
            match &self.remote {
                Some(remote) => remote.ping().await.map_err(StoreError::from),
                None => Err(StoreError::RemoteNotConfigured),
            }
        };
        let (local, database, network) =
            futures::join!(self.local.probe(), self.database.probe(), remote_probe);

        if let Err(e) = &local {
            issues.push(format!("Local storage unavailable: {}", e));
        }
        if let Err(e) = &database {
            issues.push(format!("Database storage unavailable: {}", e));
        }
        if let Err(e) = &network {
            issues.push(format!("Remote storage unreachable: {}", e));
        }

        let mut corrupted = 0;
        if local.is_ok() {
            for category in DataCategory::ALL {
                match self.local.read(category).await {
                    Ok(Some(record)) if !record.is_intact() => {
                        corrupted += 1;
                        issues.push(format!("Local copy of {} failed its integrity check", category));
                    }
                    Err(e @ StoreError::Corrupted { .. }) => {
                        corrupted += 1;
                        issues.push(e.to_string());
                    }
                    _ => {}
                }
            }
        }

        let storage_types = StorageTypes {
            local: local.is_ok(),
            database: database.is_ok(),
            network: network.is_ok(),
        };
        let healthy = storage_types.local && storage_types.database && corrupted == 0;

        if !healthy {
            log::warn!("Storage health check found {} issue(s)", issues.len());
        }

        HealthStatus {
            healthy,
            storage_types,
            issues,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Remote storage is not configured")]
    RemoteNotConfigured,

    #[error("{tier} copy of {category} is corrupted: {reason}")]
    Corrupted {
        tier: StorageTier,
        category: DataCategory,
        reason: String,
    },

    #[error("{tier} probe failed: {reason}")]
    Probe { tier: StorageTier, reason: String },

    #[error("Write failed on every tier: {0}")]
    AllTiersFailed(String),
}

// ============================================================================
// Tests
// ============================================================================
