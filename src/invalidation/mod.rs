//! Invalidation Policy Module
//!
//! Decides which cache entries to purge after writes, identity changes and
//! explicit wide-blast invalidations, and tracks per-collection generations
//! so an in-flight read that started before an invalidation cannot write
//! its stale result back into the cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::access::keys::collection_prefix;
use crate::cache::CacheStore;

/// Identity changes that must drop every cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityTransition {
    Login,
    Logout,
    MasqueradeStart,
    MasqueradeStop,
}

impl fmt::Display for IdentityTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentityTransition::Login => "login",
            IdentityTransition::Logout => "logout",
            IdentityTransition::MasqueradeStart => "masquerade-start",
            IdentityTransition::MasqueradeStop => "masquerade-stop",
        };
        f.write_str(name)
    }
}

/// Snapshot of how many times a collection (and the whole cache) has been
/// invalidated. Two equal generations mean nothing was purged in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Generation {
    epoch: u64,
    collection: u64,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}.{}", self.epoch, self.collection)
    }
}

#[derive(Debug, Default)]
struct Generations {
    /// Bumped by full clears
    epoch: u64,
    per_collection: HashMap<String, u64>,
}

// == Invalidation Policy ==
#[derive(Debug, Default)]
pub struct InvalidationPolicy {
    generations: Mutex<Generations>,
}

impl InvalidationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation of `collection`.
    pub fn generation(&self, collection: &str) -> Generation {
        let generations = self.lock();
        Generation {
            epoch: generations.epoch,
            collection: generations
                .per_collection
                .get(collection)
                .copied()
                .unwrap_or(0),
        }
    }

    /// True if `collection` has not been invalidated since `seen`.
    pub fn is_current(&self, collection: &str, seen: Generation) -> bool {
        self.generation(collection) == seen
    }

    /// Purges after a successful write: the exact document key, then every
    /// key under the owning collection.
    pub fn after_write(&self, store: &mut CacheStore, collection: &str, document_key: &str) -> usize {
        let exact = usize::from(store.invalidate(document_key));
        let swept = self.invalidate_collection(store, collection);
        debug!(
            collection = %collection,
            key = %document_key,
            removed = exact + swept,
            "Write invalidation"
        );
        exact + swept
    }

    /// Purges every key of one collection and bumps its generation.
    pub fn invalidate_collection(&self, store: &mut CacheStore, collection: &str) -> usize {
        *self
            .lock()
            .per_collection
            .entry(collection.to_string())
            .or_insert(0) += 1;
        store.invalidate_by_prefix(&collection_prefix(collection))
    }

    /// Purges each listed collection. For operations whose side effects
    /// span collections (deleting a user also edits class rosters and
    /// material ownership) callers name every affected collection.
    pub fn invalidate_collections(&self, store: &mut CacheStore, collections: &[&str]) -> usize {
        collections
            .iter()
            .map(|collection| self.invalidate_collection(store, collection))
            .sum()
    }

    /// Drops everything on an identity change.
    pub fn on_identity_transition(&self, store: &mut CacheStore, transition: IdentityTransition) {
        self.clear_all(store);
        info!(transition = %transition, "Cache cleared for identity transition");
    }

    /// Drops everything and starts a new epoch.
    pub fn clear_all(&self, store: &mut CacheStore) {
        self.lock().epoch += 1;
        store.clear_all();
    }

    fn lock(&self) -> MutexGuard<'_, Generations> {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn store() -> CacheStore {
        CacheStore::with_clock(100, 300, Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn test_after_write_purges_document_and_collection() {
        let policy = InvalidationPolicy::new();
        let mut store = store();
        store.set("users_doc:u1_admin", &1, None).unwrap();
        store.set("users_all_admin", &2, None).unwrap();
        store.set("classes_all_admin", &3, None).unwrap();

        let removed = policy.after_write(&mut store, "users", "users_doc:u1_admin");

        assert_eq!(removed, 2);
        assert_eq!(store.keys(), vec!["classes_all_admin".to_string()]);
    }

    #[test]
    fn test_generation_moves_on_invalidation() {
        let policy = InvalidationPolicy::new();
        let mut store = store();

        let before = policy.generation("classes");
        assert!(policy.is_current("classes", before));

        policy.invalidate_collection(&mut store, "classes");

        assert!(!policy.is_current("classes", before));
        // Other collections are unaffected
        assert_eq!(policy.generation("users"), Generation::default());
    }

    #[test]
    fn test_identity_transition_clears_and_bumps_epoch() {
        let policy = InvalidationPolicy::new();
        let mut store = store();
        store.set("users_all_a", &1, None).unwrap();
        let before = policy.generation("users");

        policy.on_identity_transition(&mut store, IdentityTransition::MasqueradeStart);

        assert!(store.is_empty());
        assert!(!policy.is_current("users", before));
        assert!(!policy.is_current("classes", Generation::default()));
    }

    #[test]
    fn test_invalidate_collections() {
        let policy = InvalidationPolicy::new();
        let mut store = store();
        store.set("users_doc:u1_a", &1, None).unwrap();
        store.set("classes_all_a", &2, None).unwrap();
        store.set("materials_all_a", &3, None).unwrap();
        store.set("payments_all_a", &4, None).unwrap();

        let removed = policy.invalidate_collections(&mut store, &["users", "classes", "materials"]);

        assert_eq!(removed, 3);
        assert_eq!(store.keys(), vec!["payments_all_a".to_string()]);
    }

    #[test]
    fn test_repeat_invalidation_is_harmless() {
        let policy = InvalidationPolicy::new();
        let mut store = store();

        assert_eq!(policy.after_write(&mut store, "users", "users_doc:x_a"), 0);
        assert_eq!(policy.after_write(&mut store, "users", "users_doc:x_a"), 0);
    }

    #[test]
    fn test_transition_display() {
        assert_eq!(IdentityTransition::MasqueradeStop.to_string(), "masquerade-stop");
        assert_eq!(Generation::default().to_string(), "g0.0");
    }
}
