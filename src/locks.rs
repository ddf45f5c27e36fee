use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Exclusive token for one key. Dropping it releases the lock.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Returned when the deadline passes before the lock is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

/// One async mutex per key, created on first use.
///
/// Holders of different keys never contend; holders of the same key are
/// granted the lock in FIFO order (tokio's mutex is fair).
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(key) {
            return existing.value().clone();
        }
        self.locks.entry(key.clone()).or_default().value().clone()
    }

    /// Wait for the lock on `key` until `deadline`.
    pub async fn acquire(&self, key: &K, deadline: Instant) -> Result<KeyGuard, Elapsed> {
        let slot = self.slot(key);
        tokio::time::timeout_at(deadline, slot.lock_owned())
            .await
            .map_err(|_| Elapsed)
    }

    /// Take the lock only if nobody holds it right now.
    pub fn try_acquire(&self, key: &K) -> Option<KeyGuard> {
        self.slot(key).try_lock_owned().ok()
    }

    /// Drop entries nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // The shard write lock is held during `retain`, so no new clone of a
        // slot can appear while its strong count is inspected.
        self.locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
