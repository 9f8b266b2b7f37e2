//! Keyed mutual exclusion
//!
//! Uploaders and the garbage collector take the lock for a fingerprint
//! around every lookup-then-mutate sequence on the dedup index, so two
//! requests touching the same content are strictly ordered. Upload batches
//! also hold their owner's lock from quota admission to the last commit.
//! Entries are created on demand and dropped again once nobody holds or
//! waits for them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::fingerprint::Fingerprint;

type LockTable<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// Registry of async locks, one per key
pub struct KeyedLocks<K> {
    table: Arc<LockTable<K>>,
}

/// Locks serializing work on one piece of content
pub type FingerprintLocks = KeyedLocks<Fingerprint>;

/// Locks serializing upload batches of one user, keyed by user id
pub type OwnerLocks = KeyedLocks<String>;

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a key
    pub async fn acquire(&self, key: &K) -> KeyedGuard<K> {
        let lock = {
            let mut table = self.table.lock();
            table
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;

        KeyedGuard {
            key: key.clone(),
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently locked or waited on
    pub fn active(&self) -> usize {
        self.table.lock().len()
    }
}

/// Held while a key is being worked on
pub struct KeyedGuard<K: Eq + Hash> {
    key: K,
    table: Arc<LockTable<K>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> KeyedGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        // Release first so the strong count below only sees the table and waiters
        self.guard.take();

        let mut table = self.table.lock();
        if let Some(lock) = table.get(&self.key) {
            if Arc::strong_count(lock) == 1 {
                table.remove(&self.key);
            }
        }
    }
}
