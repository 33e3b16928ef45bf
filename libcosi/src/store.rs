//! Versioned, watchable entity store.
//!
//! [`Store`] is a typed key-value store over one resource kind, keyed by
//! `(namespace, name)`.  Every committed write bumps the object's
//! `resource_version`; [`Store::update`] and [`Store::update_status`] are
//! conditional on the caller's token and fail with [`CosiError::Conflict`]
//! when it is stale.  All coordination between reconciliation workers goes
//! through this check-and-set primitive; no component holds an in-memory
//! lock across reconciliation passes.
//!
//! [`Registry`] bundles the typed stores for all COSI kinds into one
//! explicit value constructed by the process entry point, replacing
//! init-time global scheme registration.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::CosiError;
use crate::types::{
    Bucket, BucketAccess, BucketAccessClass, BucketAccessRequest, BucketClass, BucketRequest,
    Object, ObjectKey, Secret,
};

/// Watch event emitted on every committed write.
#[derive(Debug, Clone)]
pub enum Event<T> {
    /// Object created or updated (including deletion-timestamp writes).
    Applied(T),
    /// Object finally removed from the store.
    Deleted(T),
}

/// Buffered events per watch subscriber before the subscriber lags.
const WATCH_BUFFER: usize = 256;

/// Typed store for one resource kind.
///
/// All mutable state is behind a concurrent map ([`DashMap`]), allowing
/// multiple Tokio tasks to operate on different objects concurrently.
/// Per-object mutations are serialized by the map's entry lock, which is
/// what makes the version check-and-set atomic.
pub struct Store<T: Object> {
    objects: DashMap<ObjectKey, T>,
    next_version: AtomicU64,
    events: broadcast::Sender<Event<T>>,
}

impl<T: Object> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Object> Store<T> {
    /// Empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            objects: DashMap::new(),
            next_version: AtomicU64::new(1),
            events,
        }
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: Event<T>) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    /// Create a new object. The store assigns `uid`, `resource_version`,
    /// and `creation_timestamp`; caller-supplied values are overwritten.
    pub fn create(&self, mut obj: T) -> Result<T, CosiError> {
        if obj.metadata().name.is_empty() {
            return Err(CosiError::InvalidArgument(format!(
                "{} name must not be empty",
                T::KIND
            )));
        }
        let version = self.bump_version();
        {
            let meta = obj.metadata_mut();
            if meta.uid.is_empty() {
                meta.uid = Uuid::new_v4().to_string();
            }
            meta.resource_version = version;
            meta.creation_timestamp = Some(Utc::now());
        }
        let key = obj.key();
        match self.objects.entry(key) {
            Entry::Occupied(occupied) => Err(CosiError::AlreadyExists {
                kind: T::KIND.to_owned(),
                name: occupied.key().to_string(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(obj.clone());
                self.emit(Event::Applied(obj.clone()));
                Ok(obj)
            }
        }
    }

    /// Fetch a snapshot of the object at `key`.
    pub fn get(&self, key: &ObjectKey) -> Option<T> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    /// Snapshot of all objects, in no particular order.
    pub fn list(&self) -> Vec<T> {
        self.objects
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Conditionally replace the object: fails with [`CosiError::Conflict`]
    /// when the caller's `resource_version` is stale, [`CosiError::NotFound`]
    /// when the object is gone.
    pub fn update(&self, mut obj: T) -> Result<T, CosiError> {
        let key = obj.key();
        match self.objects.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.metadata().resource_version != obj.metadata().resource_version {
                    return Err(CosiError::Conflict {
                        kind: T::KIND.to_owned(),
                        name: occupied.key().to_string(),
                    });
                }
                let version = self.bump_version();
                {
                    let meta = obj.metadata_mut();
                    meta.resource_version = version;
                    // uid and creation timestamp are immutable once assigned.
                    meta.uid = current.metadata().uid.clone();
                    meta.creation_timestamp = current.metadata().creation_timestamp;
                }
                occupied.insert(obj.clone());
                self.emit(Event::Applied(obj.clone()));
                Ok(obj)
            }
            Entry::Vacant(vacant) => Err(CosiError::NotFound {
                kind: T::KIND.to_owned(),
                name: vacant.key().to_string(),
            }),
        }
    }

    /// Conditionally replace only the status block, leaving the stored spec
    /// and metadata (other than the version token) untouched. Same CAS
    /// discipline as [`Store::update`].
    pub fn update_status(&self, obj: &T) -> Result<T, CosiError> {
        let key = obj.key();
        match self.objects.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().metadata().resource_version != obj.metadata().resource_version {
                    return Err(CosiError::Conflict {
                        kind: T::KIND.to_owned(),
                        name: occupied.key().to_string(),
                    });
                }
                let version = self.bump_version();
                let mut stored = occupied.get().clone();
                stored.set_status(obj.status().clone());
                stored.metadata_mut().resource_version = version;
                occupied.insert(stored.clone());
                self.emit(Event::Applied(stored.clone()));
                Ok(stored)
            }
            Entry::Vacant(vacant) => Err(CosiError::NotFound {
                kind: T::KIND.to_owned(),
                name: vacant.key().to_string(),
            }),
        }
    }

    /// Request deletion: sets `deletion_timestamp` and emits an event so the
    /// binding engine can run release.  The object remains in the store until
    /// [`Store::remove`] is called after teardown completes.  Idempotent.
    pub fn mark_deleted(&self, key: &ObjectKey) -> Result<T, CosiError> {
        match self.objects.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().metadata().deletion_timestamp.is_some() {
                    return Ok(occupied.get().clone());
                }
                let version = self.bump_version();
                let mut stored = occupied.get().clone();
                stored.metadata_mut().deletion_timestamp = Some(Utc::now());
                stored.metadata_mut().resource_version = version;
                occupied.insert(stored.clone());
                self.emit(Event::Applied(stored.clone()));
                Ok(stored)
            }
            Entry::Vacant(_) => Err(CosiError::NotFound {
                kind: T::KIND.to_owned(),
                name: key.to_string(),
            }),
        }
    }

    /// Final removal. Emits [`Event::Deleted`].
    pub fn remove(&self, key: &ObjectKey) -> Result<T, CosiError> {
        match self.objects.remove(key) {
            Some((_, obj)) => {
                self.emit(Event::Deleted(obj.clone()));
                Ok(obj)
            }
            None => Err(CosiError::NotFound {
                kind: T::KIND.to_owned(),
                name: key.to_string(),
            }),
        }
    }

    /// Subscribe to write events. Slow subscribers may observe
    /// [`broadcast::error::RecvError::Lagged`] and should resync via
    /// [`Store::list`].
    pub fn watch(&self) -> broadcast::Receiver<Event<T>> {
        self.events.subscribe()
    }
}

/// Explicit registry of all COSI stores.
///
/// Constructed once by the process entry point and shared across engines and
/// workers; there is no hidden global registration.
pub struct Registry {
    pub bucket_requests: Arc<Store<BucketRequest>>,
    pub buckets: Arc<Store<Bucket>>,
    pub bucket_classes: Arc<Store<BucketClass>>,
    pub bucket_access_requests: Arc<Store<BucketAccessRequest>>,
    pub bucket_accesses: Arc<Store<BucketAccess>>,
    pub bucket_access_classes: Arc<Store<BucketAccessClass>>,
    pub secrets: Arc<Store<Secret>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Fresh registry with empty stores for every kind.
    pub fn new() -> Self {
        Self {
            bucket_requests: Arc::new(Store::new()),
            buckets: Arc::new(Store::new()),
            bucket_classes: Arc::new(Store::new()),
            bucket_access_requests: Arc::new(Store::new()),
            bucket_accesses: Arc::new(Store::new()),
            bucket_access_classes: Arc::new(Store::new()),
            secrets: Arc::new(Store::new()),
        }
    }
}
