//! Database storage tier - versioned records in SQLite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::sync::Arc;

use super::models::{DataCategory, StorageTier, VersionedRecord};
use super::{StorageBackend, StoreError};
use crate::db::Database;

pub struct DatabaseTier {
    db: Arc<Database>,
}

impl DatabaseTier {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StorageBackend for DatabaseTier {
    fn tier(&self) -> StorageTier {
        StorageTier::Database
    }

    async fn read(&self, category: DataCategory) -> Result<Option<VersionedRecord>, StoreError> {
        let row = self.db.query_optional(
            "SELECT version, data, checksum, origin, updated_at FROM records WHERE category = ?1",
            params![category.as_str()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )?;

        let Some((version, data, checksum, origin, updated_at)) = row else {
            return Ok(None);
        };

        let corrupted = |reason: String| StoreError::Corrupted {
            tier: StorageTier::Database,
            category,
            reason,
        };

        let data = serde_json::from_str(&data).map_err(|e| corrupted(e.to_string()))?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupted(e.to_string()))?;

        Ok(Some(VersionedRecord {
            category,
            version,
            data,
            checksum,
            origin,
            updated_at,
        }))
    }

    async fn write(&self, record: &VersionedRecord) -> Result<(), StoreError> {
        self.db.execute(
            r#"
            INSERT INTO records (category, version, data, checksum, origin, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(category) DO UPDATE SET
                version = excluded.version,
                data = excluded.data,
                checksum = excluded.checksum,
                origin = excluded.origin,
                updated_at = excluded.updated_at
            "#,
            params![
                record.category.as_str(),
                record.version,
                record.data.to_string(),
                record.checksum,
                record.origin,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn remove(&self, category: DataCategory) -> Result<(), StoreError> {
        self.db.execute(
            "DELETE FROM records WHERE category = ?1",
            params![category.as_str()],
        )?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), StoreError> {
        self.db.ping()?;
        Ok(())
    }
}
