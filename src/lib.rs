//! Bizvault - data-management core for small-business administration
//!
//! Multi-tier persistence of business data categories, upload tracking,
//! point-in-time backups, conflict detection/resolution and recovery.

pub mod backup;
pub mod codec;
pub mod config;
pub mod db;
pub mod recovery;
pub mod scheduler;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_utils;


use std::sync::Arc;

use backup::{AutoBackupScheduler, BackupManager};
use config::AppConfig;
use db::{Database, DbError};
use recovery::{ConflictResolver, DataRecovery};
use store::{
    DatabaseTier, HttpRemote, LocalTier, PersistentStore, RecordCache, RecordCacheConfig,
    RemoteError, RemoteStore, StoreError,
};
use sync::{ListenerRegistry, SyncManager};

/// Initialize the logger (`RUST_LOG` overrides the default `info` filter)
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

// ============================================================================
// Service Wiring
// ============================================================================

/// Every service, wired to one database and one set of storage tiers
pub struct Services {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub store: Arc<PersistentStore>,
    pub listeners: ListenerRegistry,
    pub sync: Arc<SyncManager>,
    pub backups: Arc<BackupManager>,
    pub recovery: DataRecovery,
    pub resolver: ConflictResolver,
}

impl Services {
    /// Open the on-disk database and local store named by the config
    pub fn open(config: AppConfig) -> Result<Self, StartupError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let db_path = config.database_path();
        log::info!("Database path: {:?}", db_path);
        let db = Arc::new(Database::new(db_path)?);

        let remote = match &config.remote_url {
            Some(url) => {
                let remote = HttpRemote::new(url.as_str(), config.remote_token.clone())?;
                log::info!("Remote store: {}", url);
                Some(Arc::new(remote) as Arc<dyn RemoteStore>)
            }
            None => {
                log::info!("No remote store configured, running offline");
                None
            }
        };

        Self::build(config, db, remote)
    }

    /// Wire services over an existing database and optional remote
    pub fn build(
        config: AppConfig,
        db: Arc<Database>,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Result<Self, StartupError> {
        let cache = RecordCache::with_config(RecordCacheConfig {
            max_capacity: config.cache_capacity,
            ..RecordCacheConfig::default()
        });

        let store = Arc::new(PersistentStore::new(
            Arc::new(LocalTier::new(config.local_store_dir())?),
            Arc::new(DatabaseTier::new(db.clone())),
            remote,
            cache,
        ));

        let listeners = ListenerRegistry::new();
        let sync = Arc::new(SyncManager::new(db.clone(), store.clone(), listeners.clone()));
        let backups = Arc::new(BackupManager::new(db.clone(), sync.clone()));

        Ok(Self {
            recovery: DataRecovery::new(sync.clone(), backups.clone()),
            resolver: ConflictResolver::new(sync.clone()),
            config,
            db,
            store,
            listeners,
            sync,
            backups,
        })
    }

    pub fn auto_backup(&self) -> AutoBackupScheduler {
        AutoBackupScheduler::new(self.backups.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to create data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),

    #[error("Local store initialization failed: {0}")]
    Store(#[from] StoreError),

    #[error("Remote store configuration failed: {0}")]
    Remote(#[from] RemoteError),
}
