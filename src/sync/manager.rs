//! Sync Manager - tracks and uploads local changes
//!
//! Coordinates between the persistent store, the upload queue and the remote
//! store. Handles:
//! - Committing local changes and queueing them for upload
//! - Pending count reporting and change notification
//! - Queue processing with retry/backoff
//! - Recording the last synced checksum per category

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::listeners::{Listener, ListenerRegistry};
use super::queue::{QueueError, QueueManager, QueueStats, QueueStatus};
use crate::db::{format_timestamp, Database, DbError};
use crate::scheduler::{PeriodicTask, SchedulerError};
use crate::store::{DataCategory, PersistentStore, RemoteError, StoreError, VersionedRecord};

pub const DEFAULT_PENDING_POLL: Duration = Duration::from_secs(10);

/// Sentinel meaning "no count observed yet"
const UNKNOWN_COUNT: usize = usize::MAX;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessQueueResult {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct SyncManager {
    db: Arc<Database>,
    store: Arc<PersistentStore>,
    queue: QueueManager,
    listeners: ListenerRegistry,
    last_count: AtomicUsize,
}

impl SyncManager {
    pub fn new(db: Arc<Database>, store: Arc<PersistentStore>, listeners: ListenerRegistry) -> Self {
        Self {
            queue: QueueManager::new(db.clone()),
            db,
            store,
            listeners,
            last_count: AtomicUsize::new(UNKNOWN_COUNT),
        }
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    // ========================================================================
    // Pending Count
    // ========================================================================

    /// Number of categories whose latest local change is not confirmed remotely
    pub fn get_pending_sync_count(&self) -> usize {
        match self.queue.pending_count() {
            Ok(count) => count,
            Err(e) => {
                log::error!("Failed to read pending sync count: {}", e);
                match self.last_count.load(Ordering::SeqCst) {
                    UNKNOWN_COUNT => 0,
                    last => last,
                }
            }
        }
    }

    pub fn add_listener(&self, listener: Listener) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Listener) {
        self.listeners.remove(listener);
    }

    /// Notify listeners if the pending count moved since the last observation
    pub fn refresh_pending(&self) -> usize {
        let count = self.get_pending_sync_count();
        let previous = self.last_count.swap(count, Ordering::SeqCst);

        if previous != count {
            log::debug!("Pending sync count changed: {} -> {}", previous, count);
            self.listeners.notify();
        }
        count
    }

    /// Re-read the pending count every `period`, catching out-of-band changes
    pub fn spawn_pending_poll(self: &Arc<Self>, period: Duration) -> Result<PeriodicTask, SyncError> {
        let task = PeriodicTask::new("pending-sync-poll");
        let manager = Arc::clone(self);

        task.start(period, move || {
            let manager = manager.clone();
            async move {
                manager.refresh_pending();
            }
        })?;

        Ok(task)
    }

    // ========================================================================
    // Local Changes
    // ========================================================================

    /// Save new content for a category and queue it for upload
    pub async fn commit_local(
        &self,
        category: DataCategory,
        data: serde_json::Value,
    ) -> Result<VersionedRecord, SyncError> {
        let record = self.store.save(category, data).await?;
        self.enqueue(&record)?;
        Ok(record)
    }

    /// Queue an already-saved record for upload
    pub fn enqueue(&self, record: &VersionedRecord) -> Result<(), SyncError> {
        self.queue.enqueue(record)?;
        self.refresh_pending();
        Ok(())
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Upload every queue item whose retry time has come
    pub async fn process_queue(&self) -> Result<ProcessQueueResult, SyncError> {
        let remote = self.store.remote().ok_or(SyncError::RemoteNotConfigured)?;
        let ready = self.queue.get_ready_items()?;

        if ready.is_empty() {
            log::info!("No pending queue items to process");
            return Ok(ProcessQueueResult::default());
        }

        log::info!("Processing {} pending queue items", ready.len());

        let mut result = ProcessQueueResult::default();

        for item in ready {
            let Some(item_id) = item.id else { continue };
            result.processed += 1;

            let record = match item.record() {
                Ok(record) => record,
                Err(e) => {
                    log::error!("Queue item {} has an unreadable payload: {}", item_id, e);
                    self.queue.mark_failed_and_retry(item_id, e.to_string())?;
                    result.failed += 1;
                    continue;
                }
            };

            match remote.push_record(&record).await {
                Ok(()) => {
                    self.queue.update_item_status(item_id, QueueStatus::Completed, None)?;
                    self.mark_synced(&record)?;
                    result.succeeded += 1;
                }
                Err(e) => {
                    log::warn!("Upload of {} v{} failed: {}", record.category, record.version, e);
                    self.queue.mark_failed_and_retry(item_id, e.to_string())?;
                    result.failed += 1;
                }
            }
        }

        log::info!(
            "Queue processing complete: {} succeeded, {} failed",
            result.succeeded,
            result.failed
        );

        self.refresh_pending();
        Ok(result)
    }

    /// Upload a record immediately, overwriting the remote copy
    pub async fn push_now(&self, record: &VersionedRecord) -> Result<(), SyncError> {
        let remote = self.store.remote().ok_or(SyncError::RemoteNotConfigured)?;
        remote.push_record(record).await?;

        self.queue.complete_category(record.category, record.version)?;
        self.mark_synced(record)?;
        self.refresh_pending();
        Ok(())
    }

    /// Adopt the remote copy as the local one
    pub async fn accept_remote(&self, record: &VersionedRecord) -> Result<(), SyncError> {
        self.store.write_local(record).await?;

        self.queue.complete_category(record.category, i64::MAX)?;
        self.mark_synced(record)?;
        self.refresh_pending();
        log::info!("Accepted remote {} v{}", record.category, record.version);
        Ok(())
    }

    // ========================================================================
    // Sync Points
    // ========================================================================

    /// Remember the content both sides agree on
    pub fn mark_synced(&self, record: &VersionedRecord) -> Result<(), SyncError> {
        self.db.execute(
            r#"
            INSERT INTO sync_state (category, synced_version, synced_checksum, synced_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(category) DO UPDATE SET
                synced_version = excluded.synced_version,
                synced_checksum = excluded.synced_checksum,
                synced_at = excluded.synced_at
            "#,
            params![
                record.category.as_str(),
                record.version,
                record.checksum,
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn synced_checksum(&self, category: DataCategory) -> Result<Option<String>, SyncError> {
        Ok(self.db.query_optional(
            "SELECT synced_checksum FROM sync_state WHERE category = ?1",
            params![category.as_str()],
            |row| row.get(0),
        )?)
    }

    // ========================================================================
    // Queue Maintenance
    // ========================================================================

    pub fn get_queue_stats(&self) -> Result<QueueStats, SyncError> {
        Ok(self.queue.get_stats()?)
    }

    /// Retry all failed queue items (manual trigger)
    pub fn retry_failed_syncs(&self) -> Result<usize, SyncError> {
        let count = self.queue.retry_failed_items()?;
        self.refresh_pending();
        Ok(count)
    }

    pub fn clear_completed_queue(&self, older_than_days: i64) -> Result<usize, SyncError> {
        Ok(self.queue.clear_completed(older_than_days)?)
    }

    /// Drop items that will never be retried again
    pub fn clear_failed_queue(&self) -> Result<usize, SyncError> {
        let count = self.queue.clear_failed()?;
        self.refresh_pending();
        Ok(count)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote storage is not configured")]
    RemoteNotConfigured,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DatabaseTier, LocalTier, RecordCache, RemoteStore};
    use crate::test_utils::MemoryRemote;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct Fixture {
        manager: Arc<SyncManager>,
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
        let manager = Arc::new(SyncManager::new(db, store, ListenerRegistry::new()));
        Fixture {
            manager,
            remote,
            _temp: temp,
        }
    }

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = counter.clone();
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_commit_counts_one_per_category() {
        let fx = fixture();

        fx.manager.commit_local(DataCategory::Clients, json!([{"id": 1}])).await.unwrap();
        fx.manager.commit_local(DataCategory::Clients, json!([{"id": 2}])).await.unwrap();
        fx.manager.commit_local(DataCategory::Quotes, json!([])).await.unwrap();

        assert_eq!(fx.manager.get_pending_sync_count(), 2);
    }

    #[tokio::test]
    async fn test_process_queue_uploads_and_records_sync_point() {
        let fx = fixture();
        let counter = Arc::new(AtomicUsize::new(0));
        fx.manager.add_listener(counting_listener(&counter));

        let record = fx
            .manager
            .commit_local(DataCategory::Invoices, json!([{"id": "INV-1"}]))
            .await
            .unwrap();
        let after_commit = counter.load(Ordering::SeqCst);
        assert!(after_commit >= 1);

        let result = fx.manager.process_queue().await.unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 0);

        assert_eq!(fx.manager.get_pending_sync_count(), 0);
        assert!(counter.load(Ordering::SeqCst) > after_commit);
        assert_eq!(fx.remote.record(DataCategory::Invoices), Some(record.clone()));
        assert_eq!(
            fx.manager.synced_checksum(DataCategory::Invoices).unwrap(),
            Some(record.checksum)
        );
    }

    #[tokio::test]
    async fn test_offline_upload_is_retried_later() {
        let fx = fixture();
        fx.remote.set_online(false);

        fx.manager.commit_local(DataCategory::Company, json!({"name": "Acme"})).await.unwrap();
        let result = fx.manager.process_queue().await.unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(fx.manager.get_pending_sync_count(), 1);
        assert_eq!(fx.manager.get_queue_stats().unwrap().failed_count, 1);

        // Backoff keeps it out of the next pass until reset
        fx.remote.set_online(true);
        assert_eq!(fx.manager.process_queue().await.unwrap().processed, 0);

        fx.manager.retry_failed_syncs().unwrap();
        assert_eq!(fx.manager.process_queue().await.unwrap().succeeded, 1);
        assert_eq!(fx.manager.get_pending_sync_count(), 0);
    }

    #[tokio::test]
    async fn test_queue_cleanup() {
        let fx = fixture();
        fx.manager.commit_local(DataCategory::Clients, json!([{"id": "c1"}])).await.unwrap();
        fx.manager.process_queue().await.unwrap();

        fx.remote.set_online(false);
        fx.manager.commit_local(DataCategory::Quotes, json!([{"id": "q1"}])).await.unwrap();
        fx.manager.process_queue().await.unwrap();

        // Still has retries left, so it stays queued
        assert_eq!(fx.manager.clear_failed_queue().unwrap(), 0);
        assert_eq!(fx.manager.get_pending_sync_count(), 1);

        assert_eq!(fx.manager.clear_completed_queue(0).unwrap(), 1);
        let stats = fx.manager.get_queue_stats().unwrap();
        assert_eq!(stats.completed_count, 0);
        assert_eq!(stats.failed_count, 1);
    }

    #[tokio::test]
    async fn test_removed_listener_is_not_called() {
        let fx = fixture();
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);

        fx.manager.add_listener(listener.clone());
        fx.manager.remove_listener(&listener);
        fx.manager.commit_local(DataCategory::Templates, json!([])).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_accept_remote_clears_pending() {
        let fx = fixture();
        fx.manager.commit_local(DataCategory::Settings, json!({"lang": "nl"})).await.unwrap();

        let remote_record = VersionedRecord::new(DataCategory::Settings, 7, json!({"lang": "en"}));
        fx.manager.accept_remote(&remote_record).await.unwrap();

        assert_eq!(fx.manager.get_pending_sync_count(), 0);
        let local = fx.manager.store().load(DataCategory::Settings).await.unwrap().unwrap();
        assert_eq!(local.data, json!({"lang": "en"}));
    }

    #[tokio::test]
    async fn test_process_queue_without_remote() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());
        let store = Arc::new(PersistentStore::new(
            Arc::new(LocalTier::new(temp.path()).unwrap()),
            Arc::new(DatabaseTier::new(db.clone())),
            None,
            RecordCache::new(),
        ));
        let manager = SyncManager::new(db, store, ListenerRegistry::new());

        assert!(matches!(
            manager.process_queue().await,
            Err(SyncError::RemoteNotConfigured)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_poll_notifies_on_out_of_band_change() {
        let fx = fixture();
        let counter = Arc::new(AtomicUsize::new(0));
        fx.manager.refresh_pending();
        fx.manager.add_listener(counting_listener(&counter));

        let task = fx.manager.spawn_pending_poll(DEFAULT_PENDING_POLL).unwrap();

        // Bypass the manager so only the poll can notice
        let record = VersionedRecord::new(DataCategory::Clients, 1, json!([]));
        fx.manager.queue.enqueue(&record).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        task.stop().unwrap();
    }
}
