//! Local storage tier - one JSON document per category in the data directory

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::models::{DataCategory, StorageTier, VersionedRecord};
use super::{StorageBackend, StoreError};

const PROBE_FILE: &str = ".probe";

pub struct LocalTier {
    dir: PathBuf,
}

impl LocalTier {
    /// Create the tier, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, category: DataCategory) -> PathBuf {
        self.dir.join(format!("{}.json", category.as_str()))
    }
}

#[async_trait]
impl StorageBackend for LocalTier {
    fn tier(&self) -> StorageTier {
        StorageTier::Local
    }

    async fn read(&self, category: DataCategory) -> Result<Option<VersionedRecord>, StoreError> {
        let bytes = match tokio::fs::read(self.path_for(category)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupted {
                tier: StorageTier::Local,
                category,
                reason: e.to_string(),
            })
    }

    async fn write(&self, record: &VersionedRecord) -> Result<(), StoreError> {
        let path = self.path_for(record.category);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;

        // Rename over the old document so readers never see a partial write
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, category: DataCategory) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(category)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn probe(&self) -> Result<(), StoreError> {
        let path = self.dir.join(PROBE_FILE);
        let marker = chrono::Utc::now().to_rfc3339();

        tokio::fs::write(&path, marker.as_bytes()).await?;
        let read_back = tokio::fs::read_to_string(&path).await?;
        tokio::fs::remove_file(&path).await?;

        if read_back == marker {
            Ok(())
        } else {
            Err(StoreError::Probe {
                tier: StorageTier::Local,
                reason: "probe file content changed".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let tier = LocalTier::new(temp.path()).unwrap();

        let record = VersionedRecord::new(DataCategory::Invoices, 3, json!([{"id": "INV-1"}]));
        tier.write(&record).await.unwrap();

        let loaded = tier.read(DataCategory::Invoices).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(tier.read(DataCategory::Quotes).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unparseable_document_is_corrupted() {
        let temp = TempDir::new().unwrap();
        let tier = LocalTier::new(temp.path()).unwrap();
        std::fs::write(temp.path().join("clients.json"), b"{ not json").unwrap();

        let result = tier.read(DataCategory::Clients).await;
        assert!(matches!(result, Err(StoreError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        let tier = LocalTier::new(temp.path()).unwrap();
        assert!(tier.remove(DataCategory::Company).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe() {
        let temp = TempDir::new().unwrap();
        let tier = LocalTier::new(temp.path().join("nested")).unwrap();
        tier.probe().await.unwrap();
        assert!(!tier.dir().join(PROBE_FILE).exists());
    }
}
