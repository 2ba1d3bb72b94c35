//! Resource store.
//!
//! A map from [`ResourceId`] to [`Resource`], guarded by a short
//! `parking_lot::RwLock` that is never held across an `.await`. Records are
//! replaced whole and readers always get clones, so a reader never sees a
//! half-applied mutation.
//!
//! The store is the only writer of `createdAt`/`updatedAt`.
//!
//! Durability is a JSON snapshot: [`ResourceStore::open`] loads it,
//! [`ResourceStore::flush`] rewrites it atomically and
//! [`ResourceStore::close`] flushes one last time.

mod locks;
mod snapshot;

pub use locks::LockGuard;

use crate::error::{CoreError, Result};
use crate::id::{ResourceId, ResourceKind};
use crate::model::{Record, Resource};
use chrono::Utc;
use locks::LockTable;
use parking_lot::RwLock;
use snapshot::{Snapshot, SNAPSHOT_VERSION};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

struct Entry {
    seq: u64,
    resource: Resource,
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<ResourceId, Entry>,
    /// Insertion order per kind.
    order: HashMap<ResourceKind, BTreeMap<u64, ResourceId>>,
    next_seq: u64,
    /// Bumped on every mutation.
    generation: u64,
}

impl StoreInner {
    fn insert(&mut self, resource: Resource) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let id = resource.id().clone();
        self.order
            .entry(resource.kind())
            .or_default()
            .insert(seq, id.clone());
        self.records.insert(id, Entry { seq, resource });
        self.generation += 1;
    }
}

/// Shared handle to the resource store. Cloning is cheap.
#[derive(Clone)]
pub struct ResourceStore {
    inner: Arc<RwLock<StoreInner>>,
    locks: Arc<LockTable>,
    path: Option<Arc<PathBuf>>,
    /// Serializes flushes and remembers the last flushed generation.
    flushed: Arc<tokio::sync::Mutex<u64>>,
}

impl fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceStore")
            .field("records", &self.inner.read().records.len())
            .field("path", &self.path)
            .finish()
    }
}

impl ResourceStore {
    /// Create an empty, non-durable store.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            locks: Arc::new(LockTable::default()),
            path: None,
            flushed: Arc::new(tokio::sync::Mutex::new(0)),
        }
    }

    /// Open a durable store backed by the snapshot at `path`.
    ///
    /// A missing file yields an empty store; the file is created on the
    /// first flush.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let start = Instant::now();

        let mut inner = StoreInner::default();
        if let Some(snapshot) = snapshot::load(&path).await? {
            for resource in snapshot.resources {
                if inner.records.contains_key(resource.id()) {
                    return Err(CoreError::Conflict(format!(
                        "duplicate id {} in snapshot {}",
                        resource.id(),
                        path.display()
                    )));
                }
                inner.insert(resource);
            }
        }
        let loaded = inner.records.len();
        let generation = inner.generation;

        tracing::info!(
            path = %path.display(),
            records = loaded,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Resource store opened"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            locks: Arc::new(LockTable::default()),
            path: Some(Arc::new(path)),
            flushed: Arc::new(tokio::sync::Mutex::new(generation)),
        })
    }

    /// Snapshot path, if the store is durable.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    /// Insert a new record.
    ///
    /// Stamps `createdAt` and `updatedAt` and returns the stored copy.
    ///
    /// # Errors
    ///
    /// [`CoreError::Conflict`] if a record with the same ID exists.
    pub fn put<T: Record>(&self, mut record: T) -> Result<T> {
        let now = Utc::now();
        let meta = record.meta_mut();
        meta.created_at = now;
        meta.updated_at = now;

        let mut inner = self.inner.write();
        if inner.records.contains_key(record.id()) {
            return Err(CoreError::Conflict(format!("id {} already exists", record.id())));
        }
        inner.insert(record.clone().into_resource());
        drop(inner);

        tracing::trace!(id = %record.id(), kind = %T::KIND, "Record stored");
        Ok(record)
    }

    /// Fetch any record by ID.
    pub fn get(&self, id: &ResourceId) -> Result<Resource> {
        self.inner
            .read()
            .records
            .get(id)
            .map(|e| e.resource.clone())
            .ok_or_else(|| CoreError::NotFound(id.clone()))
    }

    /// Fetch a record of a specific type.
    ///
    /// An ID that names a record of another kind is reported as not found.
    pub fn get_as<T: Record>(&self, id: &ResourceId) -> Result<T> {
        T::from_resource(self.get(id)?).ok_or_else(|| CoreError::NotFound(id.clone()))
    }

    /// Whether a record with this ID exists.
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.inner.read().records.contains_key(id)
    }

    /// Apply `f` to a record and commit the result atomically.
    ///
    /// `f` works on a copy; if it returns an error nothing is written. The
    /// ID and `createdAt` cannot be changed, `updatedAt` is bumped.
    pub fn update<T, F>(&self, id: &ResourceId, f: F) -> Result<T>
    where
        T: Record,
        F: FnOnce(&mut T) -> Result<()>,
    {
        let mut inner = self.inner.write();
        let entry = inner
            .records
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(id.clone()))?;

        let mut record =
            T::from_resource(entry.resource.clone()).ok_or_else(|| CoreError::NotFound(id.clone()))?;
        let created_at = record.meta().created_at;

        f(&mut record)?;

        let meta = record.meta_mut();
        meta.id = id.clone();
        meta.created_at = created_at;
        meta.updated_at = Utc::now().max(created_at);

        entry.resource = record.clone().into_resource();
        inner.generation += 1;
        Ok(record)
    }

    /// Remove a record, returning it.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if absent, including on a second delete.
    pub fn delete(&self, id: &ResourceId) -> Result<Resource> {
        let mut inner = self.inner.write();
        let entry = inner
            .records
            .remove(id)
            .ok_or_else(|| CoreError::NotFound(id.clone()))?;

        let kind = entry.resource.kind();
        if let Some(order) = inner.order.get_mut(&kind) {
            order.remove(&entry.seq);
        }
        inner.generation += 1;
        drop(inner);

        tracing::trace!(id = %id, kind = %kind, "Record removed");
        Ok(entry.resource)
    }

    /// Lazily list records of type `T` matching `filter`, in insertion order.
    pub fn list<T, F>(&self, filter: F) -> Listing<T>
    where
        T: Record,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Listing {
            store: self.clone(),
            filter: Arc::new(filter),
            cursor: 0,
            _kind: PhantomData,
        }
    }

    /// List every record of type `T`.
    pub fn list_all<T: Record>(&self) -> Listing<T> {
        self.list(|_: &T| true)
    }

    /// Number of records of a kind.
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.inner.read().order.get(&kind).map_or(0, BTreeMap::len)
    }

    /// Lock a set of IDs for the duration of a multi-step operation.
    ///
    /// IDs are acquired in sorted order, so callers locking overlapping sets
    /// cannot deadlock. The IDs do not have to exist yet.
    pub async fn lock(&self, ids: &[&ResourceId]) -> LockGuard {
        self.locks.acquire(ids).await
    }

    /// Write the snapshot if anything changed since the last flush.
    ///
    /// A no-op for in-memory stores.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let mut flushed = self.flushed.lock().await;
        let (bytes, generation, records) = {
            let inner = self.inner.read();
            if inner.generation == *flushed {
                return Ok(());
            }
            let mut entries: Vec<&Entry> = inner.records.values().collect();
            entries.sort_by_key(|e| e.seq);
            let snapshot = Snapshot {
                version: SNAPSHOT_VERSION,
                resources: entries.into_iter().map(|e| e.resource.clone()).collect(),
            };
            (serde_json::to_vec_pretty(&snapshot)?, inner.generation, snapshot.resources.len())
        };

        let start = Instant::now();
        snapshot::write_atomic(path, &bytes).await?;
        *flushed = generation;

        tracing::debug!(
            path = %path.display(),
            records,
            bytes = bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Snapshot written"
        );
        Ok(())
    }

    /// Flush and release the store.
    pub async fn close(self) -> Result<()> {
        self.flush().await?;
        if let Some(path) = self.path.as_deref() {
            tracing::info!(path = %path.display(), "Resource store closed");
        }
        Ok(())
    }

    /// Next record of type `T` after `cursor` that passes `filter`.
    fn next_after<T: Record>(&self, cursor: u64, filter: &dyn Fn(&T) -> bool) -> Option<(u64, T)> {
        let inner = self.inner.read();
        let order = inner.order.get(&T::KIND)?;
        order
            .range((Bound::Excluded(cursor), Bound::Unbounded))
            .filter_map(|(seq, id)| {
                let entry = inner.records.get(id)?;
                let record = T::from_resource(entry.resource.clone())?;
                Some((*seq, record))
            })
            .find(|(_, record)| filter(record))
    }
}

/// Lazy, restartable sequence of records.
///
/// Each step reads the live store, so records inserted after the listing was
/// created are seen if they sort after the cursor and removed records are
/// skipped.
pub struct Listing<T> {
    store: ResourceStore,
    filter: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    /// Sequence number of the last yielded record.
    cursor: u64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Clone for Listing<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            filter: Arc::clone(&self.filter),
            cursor: self.cursor,
            _kind: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Listing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listing").field("cursor", &self.cursor).finish()
    }
}

impl<T: Record> Listing<T> {
    /// Rewind to the first record.
    pub fn restart(&mut self) {
        self.cursor = 0;
    }
}

impl<T: Record> Iterator for Listing<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let (seq, record) = self.store.next_after(self.cursor, self.filter.as_ref())?;
        self.cursor = seq;
        Some(record)
    }
}
