//! Bookkeeping of outstanding fetches and pushes.
//!
//! An entry is either waiting or claimed by the handler currently working on
//! it. The set reports "now empty" from inside the same critical section as
//! the release or removal that left nothing waiting and nothing claimed, so
//! exactly one caller observes the transition, and only after its work is done.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome of removing an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed<V> {
    pub value: V,
    /// Whether this removal left the set empty.
    pub now_empty: bool,
}

/// A keyed set of outstanding work guarded by a single lock.
///
/// The lock is held only for the map operation itself.
#[derive(Debug)]
pub struct PendingSet<K, V> {
    inner: Mutex<Entries<K, V>>,
}

#[derive(Debug)]
struct Entries<K, V> {
    waiting: HashMap<K, V>,
    claimed: HashSet<K>,
}

impl<K, V> Entries<K, V> {
    fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.claimed.is_empty()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> PendingSet<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Entries {
                waiting: HashMap::new(),
                claimed: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `key`, returning any waiting value it replaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.lock().waiting.insert(key, value)
    }

    /// Take a waiting entry for processing. The set stays non-empty until
    /// the claim is [released](Self::release).
    pub fn claim(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let value = inner.waiting.remove(key)?;
        inner.claimed.insert(key.clone());
        Some(value)
    }

    /// Finish a claimed entry. Returns whether the set is now empty.
    pub fn release(&self, key: &K) -> bool {
        let mut inner = self.lock();
        inner.claimed.remove(key) && inner.is_empty()
    }

    /// Stop tracking a waiting `key`.
    pub fn remove(&self, key: &K) -> Option<Removed<V>> {
        let mut inner = self.lock();
        let value = inner.waiting.remove(key)?;
        Some(Removed {
            value,
            now_empty: inner.is_empty(),
        })
    }

    /// Nothing waiting and nothing claimed.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Waiting plus claimed entries.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.waiting.len() + inner.claimed.len()
    }

    /// Keys still waiting.
    pub fn keys(&self) -> Vec<K> {
        self.lock().waiting.keys().cloned().collect()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for PendingSet<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
