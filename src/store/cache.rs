//! Record cache - in-memory cache of recently read category records
//!
//! Provides:
//! - Capacity-bounded LRU-style eviction
//! - TTL expiration so out-of-band edits are picked up
//! - Hit/miss statistics

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::models::{DataCategory, VersionedRecord};

/// Record cache configuration
pub struct RecordCacheConfig {
    /// Maximum number of records to cache
    pub max_capacity: u64,

    /// Time-to-live for cached records (in seconds)
    pub ttl_secs: u64,
}

impl Default for RecordCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 64,
            ttl_secs: 300,
        }
    }
}

#[derive(Clone)]
pub struct RecordCache {
    cache: Arc<Cache<DataCategory, VersionedRecord>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::with_config(RecordCacheConfig::default())
    }

    pub fn with_config(config: RecordCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();

        Self {
            cache: Arc::new(cache),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, category: DataCategory) -> Option<VersionedRecord> {
        match self.cache.get(&category).await {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(record)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert(&self, record: VersionedRecord) {
        self.cache.insert(record.category, record).await;
    }

    pub async fn invalidate(&self, category: DataCategory) {
        self.cache.invalidate(&category).await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            (hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            total_requests,
            hit_rate,
        }
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
}
