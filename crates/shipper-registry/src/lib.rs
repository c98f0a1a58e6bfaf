//! In-process registry of active tail workers.
//!
//! The discovery loop (component D) and the tail workers it starts
//! (component C) share no state except through this registry: a single
//! `Mutex<HashMap<PathBuf, TailHandle>>`. The lock is held only to mutate
//! or read the map itself, never across I/O — a worker's offset is an
//! `Arc<AtomicU64>` so readers can observe progress without the registry
//! lock, and cancellation is a shared `Arc<AtomicBool>` flag the worker
//! polls on its own schedule.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A handle to one running tail worker, shared between the registry and
/// the worker task that owns the file.
#[derive(Debug, Clone)]
pub struct TailHandle {
    pub offset: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
}

impl TailHandle {
    pub fn new(offset: u64) -> Self {
        Self {
            offset: Arc::new(AtomicU64::new(offset)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn current_offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Signal the owning worker to stop at its next opportunity.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// The shared registry of paths currently being tailed.
#[derive(Debug, Default)]
pub struct TailRegistry {
    inner: Mutex<HashMap<PathBuf, TailHandle>>,
}

impl TailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `path` already has a worker registered.
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().expect("tail registry poisoned").contains_key(path)
    }

    /// Register a new worker for `path`, returning its handle. Overwrites
    /// any previous entry for the same path (the caller is expected to have
    /// checked [`TailRegistry::contains`] first).
    pub fn insert(&self, path: PathBuf, offset: u64) -> TailHandle {
        let handle = TailHandle::new(offset);
        self.inner
            .lock()
            .expect("tail registry poisoned")
            .insert(path, handle.clone());
        handle
    }

    /// Remove a worker's entry, e.g. once its task has finished.
    pub fn remove(&self, path: &Path) -> Option<TailHandle> {
        self.inner.lock().expect("tail registry poisoned").remove(path)
    }

    /// Clone out the current (path, handle) pairs and release the lock
    /// before the caller does anything with them. No I/O happens under
    /// the registry lock.
    pub fn snapshot(&self) -> Vec<(PathBuf, TailHandle)> {
        self.inner
            .lock()
            .expect("tail registry poisoned")
            .iter()
            .map(|(path, handle)| (path.clone(), handle.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("tail registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains() {
        let registry = TailRegistry::new();
        let path = PathBuf::from("/var/log/app.log");
        assert!(!registry.contains(&path));
        registry.insert(path.clone(), 0);
        assert!(registry.contains(&path));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_reflects_inserted_handles_and_releases_lock() {
        let registry = TailRegistry::new();
        registry.insert(PathBuf::from("/a.log"), 10);
        registry.insert(PathBuf::from("/b.log"), 20);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        // snapshot() must not hold the lock: a second lock-taking call
        // from the same thread would deadlock with a std::sync::Mutex
        // if it did.
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_drops_entry_and_returns_handle() {
        let registry = TailRegistry::new();
        let path = PathBuf::from("/gone.log");
        registry.insert(path.clone(), 5);

        let handle = registry.remove(&path).expect("handle present");
        assert_eq!(handle.current_offset(), 5);
        assert!(!registry.contains(&path));
    }

    #[test]
    fn cancel_is_visible_through_cloned_handle() {
        let handle = TailHandle::new(0);
        let cloned = handle.clone();
        assert!(!cloned.is_cancelled());
        handle.cancel();
        assert!(cloned.is_cancelled());
    }

    #[test]
    fn offset_updates_are_visible_without_registry_lock() {
        let registry = TailRegistry::new();
        let handle = registry.insert(PathBuf::from("/c.log"), 0);
        handle.offset.store(42, Ordering::Release);

        let snapshot = registry.snapshot();
        let (_, snapshotted_handle) = snapshot.into_iter().next().unwrap();
        assert_eq!(snapshotted_handle.current_offset(), 42);
    }
}
