//! Bounded duplicate-suppression cache
//!
//! The server re-delivers pushes it has not seen acknowledged, and the same
//! friend message may arrive both as a push and in a pull. Each incoming item
//! is checked against a fixed-size FIFO of recently seen keys; the check and
//! the insert happen under one lock so concurrent pushes cannot both win.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Mutex;

use hashbrown::HashSet;

/// Duplicate suppression statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub inserted: u64,
    pub duplicates: u64,
    pub evicted: u64,
}

impl CacheStats {
    pub fn duplicate_rate(&self) -> f64 {
        let total = self.inserted + self.duplicates;
        if total == 0 {
            0.0
        } else {
            self.duplicates as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Inner<K> {
    order: VecDeque<K>,
    members: HashSet<K>,
    stats: CacheStats,
}

/// FIFO of the last `capacity` distinct keys
#[derive(Debug)]
pub struct SyncingCacheList<K> {
    capacity: usize,
    inner: Mutex<Inner<K>>,
}

impl<K: Clone + Eq + Hash> SyncingCacheList<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                order: VecDeque::with_capacity(capacity),
                members: HashSet::with_capacity(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K>> {
        // A panic while holding the lock cannot leave the queue inconsistent
        // with the set, so recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert `key` if absent. Returns `true` if the key was new.
    pub fn add_if_absent(&self, key: K) -> bool {
        let mut inner = self.lock();
        if inner.members.contains(&key) {
            inner.stats.duplicates += 1;
            return false;
        }

        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.members.remove(&oldest);
                inner.stats.evicted += 1;
            }
        }
        inner.members.insert(key.clone());
        inner.order.push_back(key);
        inner.stats.inserted += 1;
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.order.clear();
        inner.members.clear();
    }
}
