//! Per-resource-ID async locks.

use crate::id::ResourceId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const MIN_PRUNE_AT: usize = 64;

/// Table of lazily created per-ID mutexes.
///
/// Entries are weak: a mutex lives only while some guard (or waiter) holds
/// it, and dead entries are swept once the table grows past a threshold.
#[derive(Debug)]
pub(crate) struct LockTable {
    inner: Mutex<TableInner>,
}

#[derive(Debug)]
struct TableInner {
    entries: HashMap<ResourceId, Weak<AsyncMutex<()>>>,
    prune_at: usize,
}

impl Default for LockTable {
    fn default() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                prune_at: MIN_PRUNE_AT,
            }),
        }
    }
}

impl LockTable {
    fn handle(&self, id: &ResourceId) -> Arc<AsyncMutex<()>> {
        let mut inner = self.inner.lock();
        if let Some(lock) = inner.entries.get(id).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        inner.entries.insert(id.clone(), Arc::downgrade(&lock));

        if inner.entries.len() > inner.prune_at {
            inner.entries.retain(|_, weak| weak.strong_count() > 0);
            inner.prune_at = (inner.entries.len() * 2).max(MIN_PRUNE_AT);
            tracing::trace!(live = inner.entries.len(), "Pruned lock table");
        }
        lock
    }

    /// Lock every ID in `ids`, in sorted order.
    pub(crate) async fn acquire(&self, ids: &[&ResourceId]) -> LockGuard {
        let mut sorted: Vec<&ResourceId> = ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            let lock = self.handle(id);
            guards.push(lock.lock_owned().await);
        }
        LockGuard { _guards: guards }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Holds a set of per-ID locks until dropped.
#[must_use = "the locks are released as soon as the guard is dropped"]
pub struct LockGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("held", &self._guards.len())
            .finish()
    }
}
