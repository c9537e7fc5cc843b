//! Conflict detection and resolution
//!
//! Local and remote copies are compared against the checksum both sides last
//! agreed on (the sync point):
//! - equal checksums: in sync
//! - only one side moved since the sync point: that side is ahead
//! - both moved, or no sync point and the contents differ: conflict
//!
//! Resolution is a per-category state machine:
//! `NoConflict -> ConflictDetected -> UserReviewing -> Resolved`, after which
//! the category is checked again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use super::RecoveryError;
use crate::store::{DataCategory, StorageTier, VersionedRecord};
use crate::sync::SyncManager;

// ============================================================================
// Detection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    InSync,
    LocalAhead,
    RemoteAhead,
    Conflict,
    LocalOnly,
    RemoteOnly,
    Missing,
}

impl Divergence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InSync => "in_sync",
            Self::LocalAhead => "local_ahead",
            Self::RemoteAhead => "remote_ahead",
            Self::Conflict => "conflict",
            Self::LocalOnly => "local_only",
            Self::RemoteOnly => "remote_only",
            Self::Missing => "missing",
        }
    }
}

/// Classify two copies against the last agreed checksum
pub fn classify(
    local: Option<&VersionedRecord>,
    remote: Option<&VersionedRecord>,
    synced_checksum: Option<&str>,
) -> Divergence {
    match (local, remote) {
        (None, None) => Divergence::Missing,
        (Some(_), None) => Divergence::LocalOnly,
        (None, Some(_)) => Divergence::RemoteOnly,
        (Some(local), Some(remote)) if local.checksum == remote.checksum => Divergence::InSync,
        (Some(local), Some(remote)) => match synced_checksum {
            Some(synced) => {
                let local_changed = local.checksum != synced;
                let remote_changed = remote.checksum != synced;
                match (local_changed, remote_changed) {
                    (true, false) => Divergence::LocalAhead,
                    (false, true) => Divergence::RemoteAhead,
                    _ => Divergence::Conflict,
                }
            }
            None => Divergence::Conflict,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub category: DataCategory,
    pub divergence: Divergence,
    pub local: Option<VersionedRecord>,
    pub remote: Option<VersionedRecord>,
}

impl ConflictReport {
    pub fn has_conflict(&self) -> bool {
        self.divergence == Divergence::Conflict
    }
}

/// Result of one health-check pass for a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictState {
    pub has_conflict: bool,
    pub last_checked: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ConflictDetector {
    sync: Arc<SyncManager>,
}

impl ConflictDetector {
    pub fn new(sync: Arc<SyncManager>) -> Self {
        Self { sync }
    }

    /// Read both copies and classify them; never writes
    pub async fn inspect(&self, category: DataCategory) -> Result<ConflictReport, RecoveryError> {
        let store = self.sync.store();
        let local = store.load(category).await?;
        let remote = store
            .load_from(StorageTier::Remote, category)
            .await?
            .filter(|record| {
                let intact = record.is_intact();
                if !intact {
                    log::warn!("Remote copy of {} failed its integrity check", category);
                }
                intact
            });
        let synced = self.sync.synced_checksum(category)?;

        let divergence = classify(local.as_ref(), remote.as_ref(), synced.as_deref());
        log::debug!("{} divergence: {}", category, divergence.as_str());

        Ok(ConflictReport {
            category,
            divergence,
            local,
            remote,
        })
    }

    pub async fn detect_conflicts(&self, category: DataCategory) -> Result<bool, RecoveryError> {
        Ok(self.inspect(category).await?.has_conflict())
    }

    /// One check pass over every category
    pub async fn check_all(&self) -> BTreeMap<DataCategory, ConflictState> {
        let mut states = BTreeMap::new();

        for category in DataCategory::ALL {
            let state = match self.detect_conflicts(category).await {
                Ok(has_conflict) => ConflictState {
                    has_conflict,
                    last_checked: Utc::now(),
                    error: None,
                },
                Err(e) => {
                    log::warn!("Conflict check for {} failed: {}", category, e);
                    ConflictState {
                        has_conflict: false,
                        last_checked: Utc::now(),
                        error: Some(e.to_string()),
                    }
                }
            };
            states.insert(category, state);
        }

        let conflicts = states.values().filter(|s| s.has_conflict).count();
        if conflicts > 0 {
            log::warn!("{} category(ies) in conflict", conflicts);
        }
        states
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPhase {
    NoConflict,
    ConflictDetected,
    UserReviewing,
    Resolved,
}

impl fmt::Display for ConflictPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoConflict => "no conflict",
            Self::ConflictDetected => "conflict detected",
            Self::UserReviewing => "under review",
            Self::Resolved => "resolved",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepLocal,
    KeepRemote,
    Merge,
}

impl FromStr for ResolutionStrategy {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" | "keep_local" => Ok(Self::KeepLocal),
            "remote" | "keep_remote" => Ok(Self::KeepRemote),
            "merge" => Ok(Self::Merge),
            other => Err(RecoveryError::UnknownStrategy(other.to_string())),
        }
    }
}

pub struct ConflictResolver {
    sync: Arc<SyncManager>,
    detector: ConflictDetector,
    phases: Mutex<HashMap<DataCategory, ConflictPhase>>,
}

impl ConflictResolver {
    pub fn new(sync: Arc<SyncManager>) -> Self {
        Self {
            detector: ConflictDetector::new(sync.clone()),
            sync,
            phases: Mutex::new(HashMap::new()),
        }
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub fn phase(&self, category: DataCategory) -> ConflictPhase {
        self.lock_phases()
            .get(&category)
            .copied()
            .unwrap_or(ConflictPhase::NoConflict)
    }

    fn set_phase(&self, category: DataCategory, phase: ConflictPhase) {
        let previous = self.lock_phases().insert(category, phase);
        if previous != Some(phase) {
            log::info!("{}: {}", category, phase);
        }
    }

    fn lock_phases(&self) -> std::sync::MutexGuard<'_, HashMap<DataCategory, ConflictPhase>> {
        self.phases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require(&self, category: DataCategory, expected: ConflictPhase, action: &'static str) -> Result<(), RecoveryError> {
        let phase = self.phase(category);
        if phase != expected {
            return Err(RecoveryError::InvalidTransition {
                category,
                phase,
                action,
            });
        }
        Ok(())
    }

    /// Re-run detection; a category under review keeps its phase
    pub async fn refresh(&self, category: DataCategory) -> Result<ConflictPhase, RecoveryError> {
        if self.phase(category) == ConflictPhase::UserReviewing {
            return Ok(ConflictPhase::UserReviewing);
        }

        let phase = if self.detector.detect_conflicts(category).await? {
            ConflictPhase::ConflictDetected
        } else {
            ConflictPhase::NoConflict
        };
        self.set_phase(category, phase);
        Ok(phase)
    }

    /// Enter review and hand both copies to the caller
    pub async fn begin_review(&self, category: DataCategory) -> Result<ConflictReport, RecoveryError> {
        self.require(category, ConflictPhase::ConflictDetected, "review")?;

        let report = self.detector.inspect(category).await?;
        if !report.has_conflict() {
            self.set_phase(category, ConflictPhase::NoConflict);
            return Err(RecoveryError::NoConflict(category));
        }

        self.set_phase(category, ConflictPhase::UserReviewing);
        Ok(report)
    }

    pub fn cancel_review(&self, category: DataCategory) -> Result<(), RecoveryError> {
        self.require(category, ConflictPhase::UserReviewing, "cancel review")?;
        self.set_phase(category, ConflictPhase::ConflictDetected);
        Ok(())
    }

    /// Apply a strategy, then check the category again
    pub async fn resolve(
        &self,
        category: DataCategory,
        strategy: ResolutionStrategy,
    ) -> Result<ConflictPhase, RecoveryError> {
        self.require(category, ConflictPhase::UserReviewing, "resolve")?;

        if let Err(e) = self.apply(category, strategy).await {
            log::error!("Resolving {} with {:?} failed: {}", category, strategy, e);
            self.set_phase(category, ConflictPhase::ConflictDetected);
            return Err(e);
        }

        self.set_phase(category, ConflictPhase::Resolved);
        log::info!("Resolved {} with {:?}", category, strategy);

        self.refresh(category).await
    }

    async fn apply(&self, category: DataCategory, strategy: ResolutionStrategy) -> Result<(), RecoveryError> {
        let report = self.detector.inspect(category).await?;

        match strategy {
            ResolutionStrategy::KeepLocal => {
                let local = report.local.ok_or(RecoveryError::MissingSide {
                    category,
                    side: StorageTier::Local,
                })?;
                self.sync.push_now(&local).await?;
            }
            ResolutionStrategy::KeepRemote => {
                let remote = report.remote.ok_or(RecoveryError::MissingSide {
                    category,
                    side: StorageTier::Remote,
                })?;
                self.sync.accept_remote(&remote).await?;
            }
            ResolutionStrategy::Merge => {
                let (local, remote) = match (report.local, report.remote) {
                    (Some(local), Some(remote)) => (local, remote),
                    (None, _) => {
                        return Err(RecoveryError::MissingSide {
                            category,
                            side: StorageTier::Local,
                        })
                    }
                    (_, None) => {
                        return Err(RecoveryError::MissingSide {
                            category,
                            side: StorageTier::Remote,
                        })
                    }
                };

                let merged = merge_json(&local.data, &remote.data)?;
                let record = self.sync.store().save(category, merged).await?;
                self.sync.enqueue(&record)?;
                self.sync.push_now(&record).await?;
            }
        }

        Ok(())
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Merge two category payloads, local side winning on overlap
///
/// Arrays are unioned: objects by their `"id"`, other items by equality.
/// Objects are merged key by key. Anything else cannot be merged.
pub fn merge_json(local: &Value, remote: &Value) -> Result<Value, RecoveryError> {
    match (local, remote) {
        (Value::Array(local_items), Value::Array(remote_items)) => {
            let local_ids: HashSet<String> = local_items.iter().filter_map(item_id).collect();

            let mut merged = local_items.clone();
            for item in remote_items {
                let duplicate = match item_id(item) {
                    Some(id) => local_ids.contains(&id),
                    None => local_items.contains(item),
                };
                if !duplicate {
                    merged.push(item.clone());
                }
            }
            Ok(Value::Array(merged))
        }
        (Value::Object(local_map), Value::Object(remote_map)) => {
            let mut merged = remote_map.clone();
            for (key, value) in local_map {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::Object(merged))
        }
        _ => Err(RecoveryError::MergeUnsupported(format!(
            "cannot merge {} with {}",
            kind_of(local),
            kind_of(remote)
        ))),
    }
}

fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::{DatabaseTier, LocalTier, PersistentStore, RecordCache, RemoteStore};
    use crate::sync::ListenerRegistry;
    use crate::test_utils::MemoryRemote;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(data: Value) -> VersionedRecord {
        VersionedRecord::new(DataCategory::Clients, 1, data)
    }

    #[test]
    fn test_classify() {
        let a = record(json!(["a"]));
        let b = record(json!(["b"]));
        let c = record(json!(["c"]));

        assert_eq!(classify(None, None, None), Divergence::Missing);
        assert_eq!(classify(Some(&a), None, None), Divergence::LocalOnly);
        assert_eq!(classify(None, Some(&a), None), Divergence::RemoteOnly);
        assert_eq!(classify(Some(&a), Some(&a), None), Divergence::InSync);
        assert_eq!(classify(Some(&a), Some(&b), None), Divergence::Conflict);
        assert_eq!(classify(Some(&a), Some(&b), Some(&b.checksum)), Divergence::LocalAhead);
        assert_eq!(classify(Some(&a), Some(&b), Some(&a.checksum)), Divergence::RemoteAhead);
        assert_eq!(classify(Some(&a), Some(&b), Some(&c.checksum)), Divergence::Conflict);
    }

    #[test]
    fn test_merge_arrays_by_id_local_wins() {
        let local = json!([{"id": 1, "name": "local"}, {"id": 2, "name": "only local"}]);
        let remote = json!([{"id": 1, "name": "remote"}, {"id": 3, "name": "only remote"}]);

        let merged = merge_json(&local, &remote).unwrap();
        assert_eq!(
            merged,
            json!([
                {"id": 1, "name": "local"},
                {"id": 2, "name": "only local"},
                {"id": 3, "name": "only remote"}
            ])
        );
    }

    #[test]
    fn test_merge_objects_shallow() {
        let local = json!({"currency": "EUR", "vat": 21});
        let remote = json!({"currency": "USD", "logo": "x.png"});

        let merged = merge_json(&local, &remote).unwrap();
        assert_eq!(merged, json!({"currency": "EUR", "vat": 21, "logo": "x.png"}));
    }

    #[test]
    fn test_merge_mismatched_kinds_rejected() {
        assert!(matches!(
            merge_json(&json!([1]), &json!({"a": 1})),
            Err(RecoveryError::MergeUnsupported(_))
        ));
        assert!(matches!(
            merge_json(&json!("a"), &json!("b")),
            Err(RecoveryError::MergeUnsupported(_))
        ));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("local".parse::<ResolutionStrategy>().unwrap(), ResolutionStrategy::KeepLocal);
        assert_eq!("keep_remote".parse::<ResolutionStrategy>().unwrap(), ResolutionStrategy::KeepRemote);
        assert_eq!("merge".parse::<ResolutionStrategy>().unwrap(), ResolutionStrategy::Merge);
        assert!("theirs".parse::<ResolutionStrategy>().is_err());
    }

    struct Fixture {
        sync: Arc<SyncManager>,
        remote: Arc<MemoryRemote>,
        resolver: ConflictResolver,
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
        let sync = Arc::new(SyncManager::new(db, store, ListenerRegistry::new()));
        Fixture {
            resolver: ConflictResolver::new(sync.clone()),
            sync,
            remote,
            _temp: temp,
        }
    }

    /// Sync once, then change both sides independently
    async fn diverge(fx: &Fixture, category: DataCategory) {
        fx.sync.commit_local(category, json!([{"id": "base"}])).await.unwrap();
        fx.sync.process_queue().await.unwrap();

        fx.sync.commit_local(category, json!([{"id": "base"}, {"id": "mine"}])).await.unwrap();
        fx.remote.insert_record(VersionedRecord::new(
            category,
            2,
            json!([{"id": "base"}, {"id": "theirs"}]),
        ));
    }

    #[tokio::test]
    async fn test_local_ahead_is_not_a_conflict() {
        let fx = fixture();
        fx.sync.commit_local(DataCategory::Quotes, json!([1])).await.unwrap();
        fx.sync.process_queue().await.unwrap();
        fx.sync.commit_local(DataCategory::Quotes, json!([1, 2])).await.unwrap();

        let report = fx.resolver.detector().inspect(DataCategory::Quotes).await.unwrap();
        assert_eq!(report.divergence, Divergence::LocalAhead);
        assert!(!report.has_conflict());
    }

    #[tokio::test]
    async fn test_review_and_merge_resolves_conflict() {
        let fx = fixture();
        let category = DataCategory::Clients;
        diverge(&fx, category).await;

        assert_eq!(fx.resolver.refresh(category).await.unwrap(), ConflictPhase::ConflictDetected);

        let report = fx.resolver.begin_review(category).await.unwrap();
        assert!(report.local.is_some() && report.remote.is_some());
        assert_eq!(fx.resolver.phase(category), ConflictPhase::UserReviewing);

        let phase = fx.resolver.resolve(category, ResolutionStrategy::Merge).await.unwrap();
        assert_eq!(phase, ConflictPhase::NoConflict);
        assert!(!fx.resolver.detector().detect_conflicts(category).await.unwrap());

        let merged = fx.remote.record(category).unwrap();
        assert_eq!(
            merged.data,
            json!([{"id": "base"}, {"id": "mine"}, {"id": "theirs"}])
        );
        assert_eq!(fx.sync.get_pending_sync_count(), 0);
    }

    #[tokio::test]
    async fn test_keep_remote_overwrites_local() {
        let fx = fixture();
        let category = DataCategory::Invoices;
        diverge(&fx, category).await;

        fx.resolver.refresh(category).await.unwrap();
        fx.resolver.begin_review(category).await.unwrap();
        let phase = fx.resolver.resolve(category, ResolutionStrategy::KeepRemote).await.unwrap();

        assert_eq!(phase, ConflictPhase::NoConflict);
        let local = fx.sync.store().load(category).await.unwrap().unwrap();
        assert_eq!(local.data, json!([{"id": "base"}, {"id": "theirs"}]));
    }

    #[tokio::test]
    async fn test_failed_resolution_returns_to_detected() {
        let fx = fixture();
        let category = DataCategory::Company;
        diverge(&fx, category).await;

        fx.resolver.refresh(category).await.unwrap();
        fx.resolver.begin_review(category).await.unwrap();
        fx.remote.set_online(false);

        assert!(fx.resolver.resolve(category, ResolutionStrategy::KeepLocal).await.is_err());
        assert_eq!(fx.resolver.phase(category), ConflictPhase::ConflictDetected);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let fx = fixture();
        let category = DataCategory::Templates;

        assert!(matches!(
            fx.resolver.begin_review(category).await,
            Err(RecoveryError::InvalidTransition { .. })
        ));
        assert!(matches!(
            fx.resolver.resolve(category, ResolutionStrategy::KeepLocal).await,
            Err(RecoveryError::InvalidTransition { .. })
        ));
        assert!(fx.resolver.cancel_review(category).is_err());
    }

    #[tokio::test]
    async fn test_cancel_review() {
        let fx = fixture();
        let category = DataCategory::LeaveRequests;
        diverge(&fx, category).await;

        fx.resolver.refresh(category).await.unwrap();
        fx.resolver.begin_review(category).await.unwrap();
        fx.resolver.cancel_review(category).unwrap();
        assert_eq!(fx.resolver.phase(category), ConflictPhase::ConflictDetected);
    }

    #[tokio::test]
    async fn test_check_all_reports_errors_when_offline() {
        let fx = fixture();
        fx.remote.set_online(false);

        let states = fx.resolver.detector().check_all().await;
        assert_eq!(states.len(), DataCategory::ALL.len());
        assert!(states.values().all(|s| s.error.is_some() && !s.has_conflict));
    }
}
