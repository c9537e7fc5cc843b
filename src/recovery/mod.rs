//! Recovery Module - divergence detection, conflict resolution, data recovery

pub mod conflict;
pub mod recover;

pub use conflict::{
    classify, merge_json, ConflictDetector, ConflictPhase, ConflictReport, ConflictResolver,
    ConflictState, Divergence, ResolutionStrategy,
};
pub use recover::{DataRecovery, FullRecoveryResult, RecoveredCategory, RecoverySource};

use crate::store::{DataCategory, StorageTier, StoreError};
use crate::sync::SyncError;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("No valid copy of {category}: {reason}")]
    NoValidSource { category: DataCategory, reason: String },

    #[error("Cannot {action} {category} while {phase}")]
    InvalidTransition {
        category: DataCategory,
        phase: ConflictPhase,
        action: &'static str,
    },

    #[error("{0} is no longer in conflict")]
    NoConflict(DataCategory),

    #[error("No {side} copy of {category} to resolve with")]
    MissingSide { category: DataCategory, side: StorageTier },

    #[error("Merge not possible: {0}")]
    MergeUnsupported(String),

    #[error("Unknown resolution strategy '{0}' (expected local, remote or merge)")]
    UnknownStrategy(String),
}
