//! Per-hash serialization of object and record changes.
//!
//! Promotion plus commit of an upload, and record plus object removal of a
//! delete, each run under the lock for their content hash. Without it a
//! delete could remove an object that a concurrent dedup upload has just
//! committed a record for.

use dashmap::DashMap;
use depot_core::ArtifactHash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes keyed by content hash, created on demand.
#[derive(Default)]
pub struct HashLocks {
    locks: Arc<DashMap<ArtifactHash, Arc<Mutex<()>>>>,
}

impl HashLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `hash`.
    pub async fn lock(&self, hash: &ArtifactHash) -> HashLockGuard {
        let mutex = self
            .locks
            .entry(*hash)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        HashLockGuard {
            hash: *hash,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of hashes with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one hash until dropped.
pub struct HashLockGuard {
    hash: ArtifactHash,
    locks: Arc<DashMap<ArtifactHash, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for HashLockGuard {
    fn drop(&mut self) {
        // The map and this guard hold the only references when nobody else
        // is waiting; the entry can go.
        self.locks
            .remove_if(&self.hash, |_, mutex| Arc::strong_count(mutex) == 2);
        self.guard.take();
    }
}
