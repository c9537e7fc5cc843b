//! Pending-count listeners
//!
//! Callbacks are identified by their `Arc`, so registering the same one twice
//! is a no-op and removal does not need a separate handle.

use std::sync::{Arc, RwLock};

pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default, Clone)]
pub struct ListenerRegistry {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) {
        let mut listeners = self.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove(&self, listener: &Listener) {
        self.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self) {
        // Snapshot first so a callback may register or remove listeners
        let snapshot: Vec<Listener> = self.read().clone();
        for listener in snapshot {
            listener();
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Listener>> {
        self.listeners.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Listener>> {
        self.listeners.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = counter.clone();
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);

        registry.add(listener.clone());
        registry.add(listener.clone());
        assert_eq!(registry.len(), 1);

        registry.notify();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let kept = counting_listener(&counter);
        let removed = counting_listener(&counter);

        registry.add(kept.clone());
        registry.add(removed.clone());
        registry.remove(&removed);
        registry.notify();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.remove(&counting_listener(&counter));
        assert!(registry.is_empty());
    }
}
