//! Change Notification Module
//!
//! In-process publish/subscribe so a write in one part of the client can
//! tell other parts to refetch. Delivery is synchronous and best-effort,
//! with no persistence and no cross-process reach.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{error, trace};

type Listener = Arc<dyn Fn(&str) + Send + Sync>;
type ListenerList = Vec<(u64, Listener)>;

// == Change Bus ==
/// Observer list keyed by subscription id.
#[derive(Clone, Default)]
pub struct ChangeBus {
    listeners: Arc<Mutex<ListenerList>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`; it receives the subject id of every publish.
    ///
    /// The listener stays registered until the returned [`Subscription`]
    /// is dropped or explicitly unsubscribed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(listener)));
        trace!(subscription = id, "Listener subscribed");

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Delivers `subject_id` to every listener registered at call time.
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// unsubscribe. A panicking listener is logged and skipped; the rest
    /// still run. Returns the number of listeners that completed normally.
    pub fn publish(&self, subject_id: &str) -> usize {
        let snapshot: Vec<(u64, Listener)> = self.lock().clone();
        let mut delivered = 0;

        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| (*listener)(subject_id))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(subscription = id, subject = %subject_id, reason = %reason, "Change listener panicked");
                }
            }
        }

        trace!(subject = %subject_id, delivered, "Change published");
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, ListenerList> {
        lock_list(&self.listeners)
    }
}

fn lock_list(listeners: &Mutex<ListenerList>) -> MutexGuard<'_, ListenerList> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Subscription ==
/// Handle owning one listener registration; unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<ListenerList>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}

    fn remove(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock_list(&listeners).retain(|(id, _)| *id != self.id);
            trace!(subscription = self.id, "Listener unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |subject: &str| {
            sink.lock().unwrap().push(subject.to_string())
        })
    }

    #[test]
    fn test_publish_reaches_all_listeners() {
        let bus = ChangeBus::new();
        let (seen_a, listener_a) = recorder();
        let (seen_b, listener_b) = recorder();
        let _a = bus.subscribe(listener_a);
        let _b = bus.subscribe(listener_b);

        assert_eq!(bus.publish("class-42"), 2);

        assert_eq!(*seen_a.lock().unwrap(), vec!["class-42"]);
        assert_eq!(*seen_b.lock().unwrap(), vec!["class-42"]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = ChangeBus::new();
        let (seen, listener) = recorder();
        let subscription = bus.subscribe(listener);

        bus.publish("first");
        drop(subscription);
        bus.publish("second");

        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_explicit_unsubscribe_leaves_others() {
        let bus = ChangeBus::new();
        let (seen_a, listener_a) = recorder();
        let (seen_b, listener_b) = recorder();
        let a = bus.subscribe(listener_a);
        let _b = bus.subscribe(listener_b);

        a.unsubscribe();
        bus.publish("homework");

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(*seen_b.lock().unwrap(), vec!["homework"]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = ChangeBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let before = Arc::clone(&calls);
        let _first = bus.subscribe(move |_| {
            before.fetch_add(1, Ordering::SeqCst);
        });
        let _bad = bus.subscribe(|_| panic!("listener blew up"));
        let after = Arc::clone(&calls);
        let _last = bus.subscribe(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
        });

        let delivered = bus.publish("materials");

        assert_eq!(delivered, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Still registered and the bus still works
        assert_eq!(bus.listener_count(), 3);
        assert_eq!(bus.publish("materials"), 2);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_publish() {
        let bus = ChangeBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&slot);
        let subscription = bus.subscribe(move |_| {
            inner.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(subscription);

        assert_eq!(bus.publish("x"), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_bus() {
        let bus = ChangeBus::new();
        let subscription = bus.subscribe(|_| {});
        drop(bus);
        drop(subscription);
    }
}
