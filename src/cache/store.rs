//! Cache Store Module
//!
//! TTL key-value store with prefix invalidation, an LRU capacity bound, and
//! a write-through mirror into durable local storage.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStats, LruTracker};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};
use crate::storage::LocalStorage;

// == Cache Store ==
pub struct CacheStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker,
    stats: CacheStats,
    max_entries: usize,
    /// TTL in seconds for `set` calls without an explicit TTL
    default_ttl: u64,
    clock: Arc<dyn Clock>,
    /// Durable mirror; `None` keeps the store memory-only
    storage: Option<Arc<dyn LocalStorage>>,
    /// Persisted keys whose removal failed and must not survive a reload
    pending_removals: HashSet<String>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .field("default_ttl", &self.default_ttl)
            .field("persistent", &self.storage.is_some())
            .field("pending_removals", &self.pending_removals.len())
            .finish()
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        let remaining = self.retry_pending_removals();
        if remaining > 0 {
            warn!(remaining, "Stale persisted cache entries left in storage");
        }
    }
}

impl CacheStore {
    // == Constructor ==
    /// Creates a memory-only store on the system clock.
    pub fn new(max_entries: usize, default_ttl: u64) -> Self {
        Self::with_clock(max_entries, default_ttl, Arc::new(SystemClock))
    }

    /// Creates a memory-only store on the given clock.
    pub fn with_clock(max_entries: usize, default_ttl: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries: max_entries.max(1),
            default_ttl,
            clock,
            storage: None,
            pending_removals: HashSet::new(),
        }
    }

    /// Creates a store mirrored into `storage`, rehydrating what it holds.
    ///
    /// Persisted entries that are already expired or unreadable are dropped
    /// from both memory and storage right away.
    pub fn with_storage(
        max_entries: usize,
        default_ttl: u64,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn LocalStorage>,
    ) -> Self {
        let mut store = Self::with_clock(max_entries, default_ttl, clock);
        store.storage = Some(storage);
        store.rehydrate();
        store
    }

    fn rehydrate(&mut self) {
        let Some(storage) = self.storage.clone() else {
            return;
        };

        let keys = match storage.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cache rehydration skipped: storage unavailable");
                self.stats.record_persistence_failure();
                return;
            }
        };

        let now = self.clock.now_ms();
        let mut restored: Vec<(String, CacheEntry)> = Vec::new();
        let mut dropped = 0usize;

        for key in keys {
            let parsed = match storage.get_item(&key) {
                Ok(Some(raw)) => serde_json::from_str::<CacheEntry>(&raw).ok(),
                Ok(None) => continue,
                Err(e) => {
                    debug!(key = %key, error = %e, "Failed to read persisted cache entry");
                    self.stats.record_persistence_failure();
                    continue;
                }
            };

            match parsed {
                Some(entry) if !entry.is_expired(now) => restored.push((key, entry)),
                _ => {
                    dropped += 1;
                    if storage.remove_item(&key).is_err() {
                        self.stats.record_persistence_failure();
                    }
                }
            }
        }

        // Oldest first, so LRU order survives the reload
        restored.sort_by_key(|(_, entry)| entry.created_at);
        for (key, entry) in restored {
            self.insert_entry(key, entry, false);
        }

        info!(
            restored = self.entries.len(),
            dropped, "Cache rehydrated from local storage"
        );
    }

    // == Get ==
    /// Returns the value for `key` if present, fresh, and shaped like `T`.
    ///
    /// Expired entries and entries that fail to deserialize are evicted.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                debug!(key = %key, error = %e, "Cached value has unexpected shape, evicting");
                // Reclassify the hit as a miss
                self.stats.hits = self.stats.hits.saturating_sub(1);
                self.stats.record_miss();
                self.remove_entry(key);
                None
            }
        }
    }

    /// Type-erased read used by the access layer.
    pub fn get_value(&mut self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();

        let expired = match self.entries.get(key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            self.remove_entry(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        self.stats.record_hit();
        self.lru.touch(key);
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// True if `key` holds a fresh entry. Does not touch stats or recency.
    pub fn contains_fresh(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// `ttl` of `None` uses the store's default TTL. Fails only if `value`
    /// cannot be serialized; persistence problems are swallowed.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, ttl: Option<u64>) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value, ttl);
        Ok(())
    }

    /// Type-erased write used by the access layer.
    pub fn set_value(&mut self, key: &str, value: Value, ttl: Option<u64>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry::new(value, self.clock.now_ms(), ttl);
        self.insert_entry(key.to_string(), entry, true);
    }

    fn insert_entry(&mut self, key: String, entry: CacheEntry, persist: bool) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            if let Some(evicted) = self.lru.evict_oldest() {
                self.entries.remove(&evicted);
                self.unpersist(&evicted);
                self.stats.record_eviction();
                debug!(key = %evicted, "Evicted least recently used cache entry");
            }
        }

        if persist {
            self.persist(&key, &entry);
        }
        self.lru.touch(&key);
        self.entries.insert(key, entry);
        self.stats.set_total_entries(self.entries.len());
    }

    // == Invalidate ==
    /// Removes exactly one entry. Unknown keys are a no-op.
    pub fn invalidate(&mut self, key: &str) -> bool {
        let removed = self.remove_entry(key);
        if removed {
            self.stats.record_invalidations(1);
        }
        removed
    }

    /// Removes every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_by_prefix(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &doomed {
            self.remove_entry(key);
        }

        self.stats.record_invalidations(doomed.len());
        debug!(prefix = %prefix, removed = doomed.len(), "Prefix invalidation");
        doomed.len()
    }

    /// Empties the store and its durable mirror.
    pub fn clear_all(&mut self) {
        let count = self.entries.len();
        let cleared: Vec<String> = self.entries.drain().map(|(key, _)| key).collect();
        self.lru.clear();
        self.stats.record_invalidations(count);
        self.stats.set_total_entries(0);

        let Some(storage) = self.storage.clone() else {
            return;
        };

        match storage.clear() {
            Ok(()) => self.pending_removals.clear(),
            Err(e) => {
                warn!(error = %e, "Failed to clear persisted cache");
                self.stats.record_persistence_failure();
                self.pending_removals.extend(cleared);
            }
        }
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_none() {
            return false;
        }
        self.lru.remove(key);
        self.unpersist(key);
        self.stats.set_total_entries(self.entries.len());
        true
    }

    // == Persistence ==
    /// Mirrors `entry` into storage. If the write fails the previous
    /// persisted copy is removed, so a reload never serves a value older
    /// than the one last set.
    fn persist(&mut self, key: &str, entry: &CacheEntry) {
        let Some(storage) = self.storage.clone() else {
            return;
        };
        self.retry_pending_removals();

        let outcome = serde_json::to_string(entry)
            .map_err(CacheError::from)
            .and_then(|raw| storage.set_item(key, &raw));

        match outcome {
            Ok(()) => {
                self.pending_removals.remove(key);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache entry not persisted, dropping stale copy");
                self.stats.record_persistence_failure();
                self.remove_persisted(&storage, key);
            }
        }
    }

    fn unpersist(&mut self, key: &str) {
        let Some(storage) = self.storage.clone() else {
            return;
        };
        self.retry_pending_removals();
        self.remove_persisted(&storage, key);
    }

    fn remove_persisted(&mut self, storage: &Arc<dyn LocalStorage>, key: &str) {
        match storage.remove_item(key) {
            Ok(()) => {
                self.pending_removals.remove(key);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove persisted cache entry, will retry");
                self.stats.record_persistence_failure();
                self.pending_removals.insert(key.to_string());
            }
        }
    }

    /// Retries removals that failed earlier. Returns how many are still
    /// outstanding.
    pub fn retry_pending_removals(&mut self) -> usize {
        let Some(storage) = self.storage.clone() else {
            return 0;
        };
        if self.pending_removals.is_empty() {
            return 0;
        }

        let before = self.pending_removals.len();
        self.pending_removals
            .retain(|key| storage.remove_item(key).is_err());
        let remaining = self.pending_removals.len();
        if remaining < before {
            debug!(
                removed = before - remaining,
                remaining, "Retried pending storage removals"
            );
        }
        remaining
    }

    // == Cleanup Expired ==
    /// Removes all expired entries. Returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
            self.stats.record_expiration();
        }

        expired.len()
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    /// Keys currently held, fresh or not.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
