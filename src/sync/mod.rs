//! Sync Module - uploads local changes to the remote store
//!
//! Local commits are queued per category and uploaded with retry/backoff.
//! Listeners registered through an injected [`ListenerRegistry`] hear about
//! every change of the pending count.

pub mod listeners;
pub mod manager;
pub mod queue;

pub use listeners::{Listener, ListenerRegistry};
pub use manager::{ProcessQueueResult, SyncError, SyncManager, DEFAULT_PENDING_POLL};
pub use queue::{QueueError, QueueItem, QueueManager, QueueStats, QueueStatus};
