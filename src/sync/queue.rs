//! Upload Queue - local changes waiting for the remote store
//!
//! Every local commit is queued here until the remote store confirms it.
//! Uploads that fail are retried with exponential backoff.
//!
//! Features:
//! - SQLite-backed persistent queue
//! - One outstanding item per category (newer commits replace older ones)
//! - Exponential backoff retry policy, max 5 attempts
//! - Cleanup of completed items
//! - Queue statistics

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{format_timestamp, parse_timestamp, Database, DbError};
use crate::store::{DataCategory, VersionedRecord};

// ============================================================================
// Constants
// ============================================================================

const BASE_DELAY_SECS: i64 = 30; // Initial retry delay: 30 seconds
const MAX_DELAY_SECS: i64 = 3600; // Max retry delay: 1 hour
const DEFAULT_MAX_RETRIES: i32 = 5;

const ITEM_COLUMNS: &str = "id, category, payload, version, retry_count, max_retries, \
                            status, error_message, created_at, next_retry_at, updated_at";

// ============================================================================
// Data Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Failed,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "failed" => Self::Failed,
            "completed" => Self::Completed,
            _ => Self::Pending,
        }
    }
}

/// Queue item stored in database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Option<i64>,
    pub category: DataCategory,
    /// Serialized `VersionedRecord` to upload
    pub payload: String,
    pub version: i64,
    pub retry_count: i32,
    pub max_retries: i32,
    pub status: QueueStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(record: &VersionedRecord) -> Result<Self, QueueError> {
        let now = Utc::now();
        Ok(Self {
            id: None,
            category: record.category,
            payload: serde_json::to_string(record)?,
            version: record.version,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            status: QueueStatus::Pending,
            error_message: None,
            created_at: now,
            next_retry_at: Some(now),
            updated_at: now,
        })
    }

    pub fn record(&self) -> Result<VersionedRecord, QueueError> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Check if item should be retried now
    pub fn should_retry(&self) -> bool {
        if self.status != QueueStatus::Pending && self.status != QueueStatus::Failed {
            return false;
        }

        if self.retry_count >= self.max_retries {
            return false;
        }

        match self.next_retry_at {
            Some(next_retry) => Utc::now() >= next_retry,
            None => true,
        }
    }

    /// Delay before the next attempt after `retry_count` failures
    pub fn backoff_delay(retry_count: i32) -> Duration {
        let exponent = retry_count.clamp(0, 16) as u32;
        Duration::seconds((BASE_DELAY_SECS * 2_i64.pow(exponent)).min(MAX_DELAY_SECS))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_count: usize,
    pub in_progress_count: usize,
    pub failed_count: usize,
    pub completed_count: usize,
    pub total_count: usize,
}

// ============================================================================
// Queue Manager
// ============================================================================

pub struct QueueManager {
    db: Arc<Database>,
}

impl QueueManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Queue a record for upload, replacing any unconfirmed item of its category
    pub fn enqueue(&self, record: &VersionedRecord) -> Result<i64, QueueError> {
        let item = QueueItem::new(record)?;

        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction().map_err(DbError::from)?;

        let replaced = tx
            .execute(
                "DELETE FROM sync_queue WHERE category = ?1 AND status != 'completed'",
                params![item.category.as_str()],
            )
            .map_err(DbError::from)?;

        tx.execute(
            r#"
            INSERT INTO sync_queue (
                category, payload, version, retry_count, max_retries,
                status, error_message, created_at, next_retry_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                item.category.as_str(),
                item.payload,
                item.version,
                item.retry_count,
                item.max_retries,
                item.status.as_str(),
                item.error_message,
                format_timestamp(&item.created_at),
                item.next_retry_at.as_ref().map(format_timestamp),
                format_timestamp(&item.updated_at),
            ],
        )
        .map_err(DbError::from)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(DbError::from)?;

        if replaced > 0 {
            log::info!("Queued {} v{} (replaced {} older item(s))", item.category, item.version, replaced);
        } else {
            log::info!("Queued {} v{} for upload", item.category, item.version);
        }
        Ok(id)
    }

    /// Categories with a change not yet confirmed by the remote store
    pub fn pending_count(&self) -> Result<usize, QueueError> {
        let count: i64 = self.db.query_row(
            "SELECT COUNT(DISTINCT category) FROM sync_queue WHERE status != 'completed'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Items whose retry time has come
    pub fn get_ready_items(&self) -> Result<Vec<QueueItem>, QueueError> {
        let items = self.db.query(
            &format!(
                "SELECT {} FROM sync_queue \
                 WHERE status IN ('pending', 'failed') AND retry_count < max_retries \
                 ORDER BY created_at ASC",
                ITEM_COLUMNS
            ),
            [],
            map_item,
        )?;

        Ok(items.into_iter().filter(QueueItem::should_retry).collect())
    }

    pub fn get_item_by_id(&self, id: i64) -> Result<QueueItem, QueueError> {
        self.db
            .query_optional(
                &format!("SELECT {} FROM sync_queue WHERE id = ?1", ITEM_COLUMNS),
                params![id],
                map_item,
            )?
            .ok_or(QueueError::ItemNotFound(id))
    }

    pub fn update_item_status(
        &self,
        id: i64,
        status: QueueStatus,
        error_message: Option<String>,
    ) -> Result<(), QueueError> {
        let updated = self.db.execute(
            "UPDATE sync_queue SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), error_message, format_timestamp(&Utc::now()), id],
        )?;

        if updated == 0 {
            // Superseded by a newer commit while in flight
            log::debug!("Queue item {} no longer exists", id);
        }
        Ok(())
    }

    /// Mark a category's items up to `through_version` as confirmed remotely
    pub fn complete_category(&self, category: DataCategory, through_version: i64) -> Result<usize, QueueError> {
        let updated = self.db.execute(
            r#"
            UPDATE sync_queue
            SET status = 'completed', error_message = NULL, updated_at = ?1
            WHERE category = ?2 AND status != 'completed' AND version <= ?3
            "#,
            params![format_timestamp(&Utc::now()), category.as_str(), through_version],
        )?;

        if updated > 0 {
            log::info!("Marked {} queued {} item(s) as synced", updated, category);
        }
        Ok(updated)
    }

    /// Mark item as failed and schedule retry
    pub fn mark_failed_and_retry(&self, id: i64, error_message: String) -> Result<(), QueueError> {
        log::warn!("Queue item {} failed: {}", id, error_message);

        let item = self.get_item_by_id(id)?;
        let new_retry_count = item.retry_count + 1;
        let now = Utc::now();
        let next_retry = if new_retry_count < item.max_retries {
            Some(now + QueueItem::backoff_delay(new_retry_count))
        } else {
            None
        };

        self.db.execute(
            r#"
            UPDATE sync_queue
            SET status = ?1, error_message = ?2, retry_count = ?3,
                next_retry_at = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
            params![
                QueueStatus::Failed.as_str(),
                error_message,
                new_retry_count,
                next_retry.as_ref().map(format_timestamp),
                format_timestamp(&now),
                id
            ],
        )?;

        match next_retry {
            Some(retry_time) => log::info!(
                "Queue item {} will retry at {} (attempt {}/{})",
                id,
                retry_time,
                new_retry_count + 1,
                item.max_retries
            ),
            None => log::warn!("Queue item {} exceeded max retries", id),
        }

        Ok(())
    }

    pub fn get_stats(&self) -> Result<QueueStats, QueueError> {
        let stats = self.db.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COUNT(*)
            FROM sync_queue
            "#,
            [],
            |row| {
                Ok(QueueStats {
                    pending_count: row.get::<_, i64>(0)? as usize,
                    in_progress_count: row.get::<_, i64>(1)? as usize,
                    failed_count: row.get::<_, i64>(2)? as usize,
                    completed_count: row.get::<_, i64>(3)? as usize,
                    total_count: row.get::<_, i64>(4)? as usize,
                })
            },
        )?;

        Ok(stats)
    }

    /// Clear completed items older than N days
    pub fn clear_completed(&self, older_than_days: i64) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - Duration::days(older_than_days);

        let deleted = self.db.execute(
            "DELETE FROM sync_queue WHERE status = 'completed' AND updated_at <= ?1",
            params![format_timestamp(&cutoff)],
        )?;

        log::info!("Cleared {} completed queue items", deleted);
        Ok(deleted)
    }

    /// Drop items that exhausted their retries
    pub fn clear_failed(&self) -> Result<usize, QueueError> {
        let deleted = self.db.execute(
            "DELETE FROM sync_queue WHERE status = 'failed' AND retry_count >= max_retries",
            [],
        )?;

        log::info!("Cleared {} permanently failed queue items", deleted);
        Ok(deleted)
    }

    /// Reset failed items for manual retry
    pub fn retry_failed_items(&self) -> Result<usize, QueueError> {
        let now = format_timestamp(&Utc::now());

        let updated = self.db.execute(
            r#"
            UPDATE sync_queue
            SET status = 'pending',
                retry_count = 0,
                next_retry_at = ?1,
                updated_at = ?1,
                error_message = NULL
            WHERE status = 'failed'
            "#,
            params![now],
        )?;

        log::info!("Reset {} failed items for retry", updated);
        Ok(updated)
    }
}

fn map_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let category: String = row.get(1)?;
    let category = category.parse::<DataCategory>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(QueueItem {
        id: row.get(0)?,
        category,
        payload: row.get(2)?,
        version: row.get(3)?,
        retry_count: row.get(4)?,
        max_retries: row.get(5)?,
        status: QueueStatus::from_str(&row.get::<_, String>(6)?),
        error_message: row.get(7)?,
        created_at: parse_timestamp(&row.get::<_, String>(8)?)?,
        next_retry_at: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        updated_at: parse_timestamp(&row.get::<_, String>(10)?)?,
    })
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid queue payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Queue item not found: {0}")]
    ItemNotFound(i64),
}

// ============================================================================
// Tests
// ============================================================================
