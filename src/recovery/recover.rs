//! Data recovery
//!
//! Rebuilds a category whose local copy is missing or corrupted from the most
//! recently updated valid copy among the database tier, the remote store and
//! the newest backup snapshot.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::RecoveryError;
use crate::backup::{BackupManager, CategoryFailure};
use crate::store::{DataCategory, StorageTier, StoreError, VersionedRecord};
use crate::sync::SyncManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    /// Local copy was intact, nothing to do
    Local,
    Database,
    Remote,
    Backup,
    /// No copy exists anywhere
    Empty,
}

impl RecoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Database => "database",
            Self::Remote => "remote",
            Self::Backup => "backup",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredCategory {
    pub category: DataCategory,
    pub source: RecoverySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullRecoveryResult {
    pub success: bool,
    pub recovered: Vec<RecoveredCategory>,
    pub failed: Vec<CategoryFailure>,
}

pub struct DataRecovery {
    sync: Arc<SyncManager>,
    backups: Arc<BackupManager>,
}

impl DataRecovery {
    pub fn new(sync: Arc<SyncManager>, backups: Arc<BackupManager>) -> Self {
        Self { sync, backups }
    }

    /// Make sure the local copy of a category is intact
    pub async fn recover_data(&self, category: DataCategory) -> Result<RecoverySource, RecoveryError> {
        let store = self.sync.store();
        let mut problems = Vec::new();

        match store.load_from(StorageTier::Local, category).await {
            Ok(Some(record)) if record.is_intact() => return Ok(RecoverySource::Local),
            Ok(Some(record)) => {
                log::warn!("Local copy of {} v{} is corrupted", category, record.version);
                problems.push("local copy fails its checksum".to_string());
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Local copy of {} unreadable: {}", category, e);
                problems.push(format!("local: {}", e));
            }
        }

        let mut candidates: Vec<(RecoverySource, VersionedRecord)> = Vec::new();

        for (source, tier) in [
            (RecoverySource::Database, StorageTier::Database),
            (RecoverySource::Remote, StorageTier::Remote),
        ] {
            match store.load_from(tier, category).await {
                Ok(Some(record)) if record.is_intact() => candidates.push((source, record)),
                Ok(Some(_)) => problems.push(format!("{}: copy fails its checksum", tier)),
                Ok(None) | Err(StoreError::RemoteNotConfigured) => {}
                Err(e) => problems.push(format!("{}: {}", tier, e)),
            }
        }

        if let Some(record) = self.backups.latest_snapshot(category).await {
            candidates.push((RecoverySource::Backup, record));
        }

        // Newest wins; on a tie the earlier candidate is kept
        let best = candidates.into_iter().reduce(|best, candidate| {
            if candidate.1.updated_at > best.1.updated_at {
                candidate
            } else {
                best
            }
        });

        let Some((source, record)) = best else {
            if problems.is_empty() {
                log::debug!("{} has no data anywhere", category);
                return Ok(RecoverySource::Empty);
            }
            log::error!("No valid copy of {} found: {}", category, problems.join("; "));
            return Err(RecoveryError::NoValidSource {
                category,
                reason: problems.join("; "),
            });
        };

        match source {
            RecoverySource::Remote => self.sync.accept_remote(&record).await?,
            RecoverySource::Backup => {
                self.sync.commit_local(category, record.data).await?;
            }
            _ => {
                store.write_local(&record).await?;
                let synced = self.sync.synced_checksum(category)?;
                if synced.as_deref() != Some(record.checksum.as_str()) {
                    self.sync.enqueue(&record)?;
                }
            }
        }

        log::info!("Recovered {} from {}", category, source.as_str());
        Ok(source)
    }

    /// Run `recover_data` over every category
    pub async fn full_recovery(&self) -> FullRecoveryResult {
        let mut recovered = Vec::new();
        let mut failed = Vec::new();

        for category in DataCategory::ALL {
            match self.recover_data(category).await {
                Ok(source) => recovered.push(RecoveredCategory { category, source }),
                Err(e) => failed.push(CategoryFailure {
                    category,
                    reason: e.to_string(),
                }),
            }
        }

        log::info!(
            "Full recovery finished: {} recovered, {} failed",
            recovered.len(),
            failed.len()
        );

        FullRecoveryResult {
            success: failed.is_empty(),
            recovered,
            failed,
        }
    }
}
