//! Storage for per-key counter state.

use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::entry::RateLimitEntry;

/// Mapping from caller key to its counter state.
///
/// Implementations must make `hit` an atomic read-modify-write for the key
/// and must only remove entries in `remove_expired` while holding the same
/// lock a concurrent `hit` on that key would take.
pub trait Store: Send + Sync {
    /// Record one request for `key` and return the resulting state.
    ///
    /// A missing or expired entry is replaced by a fresh window holding
    /// this request; a live entry has its count incremented.
    fn hit(&self, key: &str, now_ms: u64, window_ms: u64) -> RateLimitEntry;

    /// Snapshot of the entry for `key`, if any.
    fn get(&self, key: &str) -> Option<RateLimitEntry>;

    /// Remove every entry whose window has ended. Returns how many were removed.
    fn remove_expired(&self, now_ms: u64) -> usize;

    /// Number of tracked keys, expired or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all state.
    fn clear(&self);
}

/// Single-lock store: one mutex guards the whole map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn hit(&self, key: &str, now_ms: u64, window_ms: u64) -> RateLimitEntry {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            entry.hit(now_ms, window_ms);
            return *entry;
        }

        let entry = RateLimitEntry::new(now_ms, window_ms);
        entries.insert(key.to_owned(), entry);
        entry
    }

    fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.lock().get(key).copied()
    }

    fn remove_expired(&self, now_ms: u64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_ms));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Sharded store backed by `DashMap`.
///
/// Keys hashing to different shards never contend; the shard lock makes the
/// per-key update atomic.
#[derive(Debug, Default)]
pub struct ShardedStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl ShardedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for ShardedStore {
    fn hit(&self, key: &str, now_ms: u64, window_ms: u64) -> RateLimitEntry {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.hit(now_ms, window_ms);
            return *entry;
        }

        // Another caller may have inserted the key since the lookup above.
        let entry = self
            .entries
            .entry(key.to_owned())
            .and_modify(|entry| entry.hit(now_ms, window_ms))
            .or_insert_with(|| RateLimitEntry::new(now_ms, window_ms));
        *entry
    }

    fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    fn remove_expired(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now_ms);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
