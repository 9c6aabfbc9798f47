//! Pending Registry
//!
//! Collapses concurrent fetches for the same key into one shared future.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tracing::{debug, trace, warn};

use crate::error::Result;

/// Handle to an in-flight fetch. Cloning it does not start a new fetch.
pub type PendingFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

type PendingMap = HashMap<String, PendingSlot>;

/// One registered fetch.
///
/// The map only holds a weak handle: the fetch stays alive while at least
/// one caller is awaiting it, and is dropped (and deregistered) once the
/// last caller goes away.
struct PendingSlot {
    id: u64,
    weak: Box<dyn Any + Send + Sync>,
}

// == Pending Registry ==
/// Tracks in-flight fetches by key. At most one live fetch per key.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    pending: Arc<Mutex<PendingMap>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the in-flight fetch for `key`, or starts one with `factory`.
    ///
    /// The lookup and the registration happen under a single lock, so two
    /// callers can never both start a fetch for the same key. `factory`
    /// runs under that lock: it must only build the future, not poll it,
    /// and must not call back into this registry.
    ///
    /// The registry entry is removed when the fetch settles, whether it
    /// succeeded or failed, so a later call after a failure starts afresh.
    pub fn get_or_create<T, F, Fut>(&self, key: &str, factory: F) -> PendingFetch<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        // Strong handles taken under the lock are only dropped after it is
        // released: dropping the last one runs the settle guard, which
        // locks the map again.
        let existing: Option<PendingFetch<T>>;
        let created: PendingFetch<T>;
        {
            let mut pending = self.lock();

            existing = pending.get(key).and_then(|slot| {
                let upgraded = slot
                    .weak
                    .downcast_ref::<WeakShared<BoxFuture<'static, Result<T>>>>()
                    .and_then(WeakShared::upgrade);
                if upgraded.is_none() {
                    trace!(key = %key, "Pending slot is stale or holds another type");
                }
                upgraded
            });

            if let Some(shared) = existing {
                debug!(key = %key, "Joining in-flight fetch");
                return shared;
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let guard = SettleGuard {
                pending: Arc::clone(&self.pending),
                key: key.to_string(),
                id,
            };
            let fut = factory();
            created = async move {
                let _guard = guard;
                fut.await
            }
            .boxed()
            .shared();

            match created.downgrade() {
                Some(weak) => {
                    pending.insert(
                        key.to_string(),
                        PendingSlot {
                            id,
                            weak: Box::new(weak),
                        },
                    );
                    debug!(key = %key, "Registered new fetch");
                }
                None => warn!(key = %key, "Fetch completed before registration"),
            }
        }
        created
    }

    /// True while a fetch for `key` is in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Keys with a fetch in flight.
    pub fn pending_keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its registry entry when the wrapped fetch finishes or is dropped.
///
/// Only removes the entry it created: a newer fetch registered under the
/// same key after this one went stale is left alone.
struct SettleGuard {
    pending: Arc<Mutex<PendingMap>>,
    key: String,
    id: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            pending.remove(&self.key);
            trace!(key = %self.key, "Fetch settled, registry entry removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn counting_factory(
        calls: &Arc<AtomicUsize>,
        result: Result<u32>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                result
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let registry = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = registry.get_or_create("classes_all_t1", counting_factory(&calls, Ok(7)));
        let second = registry.get_or_create("classes_all_t1", counting_factory(&calls, Ok(99)));
        assert!(registry.is_pending("classes_all_t1"));

        let (a, b) = tokio::join!(first, second);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_rejection_reaches_every_caller_and_clears_entry() {
        let registry = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let failure = Err(CacheError::Remote("unavailable".to_string()));

        let first = registry.get_or_create("users_all_a", counting_factory(&calls, failure));
        let second = registry.get_or_create("users_all_a", counting_factory(&calls, Ok(1)));
        let (a, b) = tokio::join!(first, second);

        assert_err!(&a);
        assert_eq!(a, b);
        assert!(!registry.is_pending("users_all_a"));

        // A later call retries with a fresh factory
        let retry = registry.get_or_create("users_all_a", counting_factory(&calls, Ok(5)));
        assert_eq!(assert_ok!(retry.await), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_independently() {
        let registry = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = registry.get_or_create("a", counting_factory(&calls, Ok(1)));
        let b = registry.get_or_create("b", counting_factory(&calls, Ok(2)));
        assert_eq!(registry.len(), 2);

        let (a, b) = tokio::join!(a, b);
        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_is_deregistered() {
        let registry = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = registry.get_or_create("k", counting_factory(&calls, Ok(1)));
        assert!(registry.is_pending("k"));

        drop(handle);
        assert!(!registry.is_pending("k"));

        let again = registry.get_or_create("k", counting_factory(&calls, Ok(2)));
        assert_eq!(again.await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_late_joiner_after_settlement_starts_new_fetch() {
        let registry = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = registry.get_or_create("k", counting_factory(&calls, Ok(1)));
        assert_eq!(first.await, Ok(1));

        let second = registry.get_or_create("k", counting_factory(&calls, Ok(2)));
        assert_eq!(second.await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_joined_handle_survives_first_caller_dropping() {
        let registry = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = registry.get_or_create("k", counting_factory(&calls, Ok(3)));
        let second = registry.get_or_create("k", counting_factory(&calls, Ok(4)));
        drop(first);

        assert_eq!(second.await, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
