//! Test helpers: an in-memory remote store with an offline switch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::codec::SealedSnapshot;
use crate::store::{DataCategory, RemoteError, RemoteStore, VersionedRecord};

#[derive(Default)]
pub struct MemoryRemote {
    records: Mutex<HashMap<DataCategory, VersionedRecord>>,
    snapshots: Mutex<HashMap<(String, DataCategory), SealedSnapshot>>,
    offline: AtomicBool,
    snapshot_delay: Mutex<Option<Duration>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Make every snapshot upload take `delay`
    pub fn set_snapshot_delay(&self, delay: Duration) {
        *self.snapshot_delay.lock().unwrap() = Some(delay);
    }

    /// Simulate a write made by another device
    pub fn insert_record(&self, record: VersionedRecord) {
        self.records.lock().unwrap().insert(record.category, record);
    }

    pub fn record(&self, category: DataCategory) -> Option<VersionedRecord> {
        self.records.lock().unwrap().get(&category).cloned()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::NetworkError("remote is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn ping(&self) -> Result<(), RemoteError> {
        self.check_online()
    }

    async fn fetch_record(&self, category: DataCategory) -> Result<Option<VersionedRecord>, RemoteError> {
        self.check_online()?;
        Ok(self.record(category))
    }

    async fn push_record(&self, record: &VersionedRecord) -> Result<(), RemoteError> {
        self.check_online()?;
        self.insert_record(record.clone());
        Ok(())
    }

    async fn put_snapshot(
        &self,
        backup_id: &str,
        category: DataCategory,
        snapshot: &SealedSnapshot,
    ) -> Result<(), RemoteError> {
        let delay = *self.snapshot_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_online()?;
        self.snapshots
            .lock()
            .unwrap()
            .insert((backup_id.to_string(), category), snapshot.clone());
        Ok(())
    }

    async fn fetch_snapshot(
        &self,
        backup_id: &str,
        category: DataCategory,
    ) -> Result<Option<SealedSnapshot>, RemoteError> {
        self.check_online()?;
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(&(backup_id.to_string(), category))
            .cloned())
    }

    async fn delete_snapshots(&self, backup_id: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        self.snapshots
            .lock()
            .unwrap()
            .retain(|(id, _), _| id != backup_id);
        Ok(())
    }
}
