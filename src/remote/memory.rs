//! Memory Remote Store
//!
//! In-process document store implementing `RemoteStore`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::trace;

use super::query::{compare_values, Direction, QueryConstraint};
use super::{Document, RemoteStore};
use crate::error::{CacheError, Result};

type Collections = HashMap<String, BTreeMap<String, Map<String, Value>>>;

/// In-process document store.
///
/// Evaluates filters, ordering and limits like the managed store does and
/// counts every call, so callers can assert how many round-trips a cached
/// read actually cost. Reads snapshot their result before the configured
/// latency elapses, modelling a response that is already in transit.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    collections: Mutex<Collections>,
    read_latency: Mutex<Option<Duration>>,
    failure: Mutex<Option<CacheError>>,
    queries: AtomicUsize,
    gets: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read waits `latency` before returning.
    pub fn with_read_latency(self, latency: Duration) -> Self {
        *lock(&self.read_latency) = Some(latency);
        self
    }

    pub fn set_read_latency(&self, latency: Option<Duration>) {
        *lock(&self.read_latency) = latency;
    }

    /// Makes every call fail with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<CacheError>) {
        *lock(&self.failure) = error;
    }

    /// Inserts a document directly, bypassing call counters.
    pub fn seed(&self, collection: &str, id: &str, data: Value) {
        let fields = match data {
            Value::Object(fields) => fields,
            other => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), other);
                fields
            }
        };
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    /// Reads a document directly, bypassing call counters.
    pub fn peek(&self, collection: &str, id: &str) -> Option<Map<String, Value>> {
        lock(&self.collections)
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(AtomicOrdering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(AtomicOrdering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    fn check_failure(&self) -> Result<()> {
        match lock(&self.failure).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.read_latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_query(
    docs: &BTreeMap<String, Map<String, Value>>,
    constraints: &[QueryConstraint],
) -> Vec<Document> {
    let mut matched: Vec<Document> = docs
        .iter()
        .filter(|(_, data)| {
            constraints.iter().all(|c| match c {
                QueryConstraint::Where(filter) => filter.matches(data),
                _ => true,
            })
        })
        .map(|(id, data)| Document::new(id.clone(), data.clone()))
        .collect();

    let orderings: Vec<(&str, Direction)> = constraints
        .iter()
        .filter_map(|c| match c {
            QueryConstraint::OrderBy { field, direction } => Some((field.as_str(), *direction)),
            _ => None,
        })
        .collect();

    if !orderings.is_empty() {
        matched.sort_by(|a, b| {
            for (field, direction) in &orderings {
                let ord = match (a.data.get(*field), b.data.get(*field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    // Documents missing the field sort last
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                let ord = match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let limit = constraints
        .iter()
        .filter_map(|c| match c {
            QueryConstraint::Limit(n) => Some(*n),
            _ => None,
        })
        .min();
    if let Some(limit) = limit {
        matched.truncate(limit);
    }

    matched
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn query(
        &self,
        collection: &str,
        constraints: &[QueryConstraint],
    ) -> Result<Vec<Document>> {
        self.queries.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_failure()?;

        let result = lock(&self.collections)
            .get(collection)
            .map(|docs| run_query(docs, constraints))
            .unwrap_or_default();
        trace!(collection = %collection, results = result.len(), "Remote query");

        self.simulate_latency().await;
        Ok(result)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.gets.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_failure()?;

        let result = self
            .peek(collection, id)
            .map(|data| Document::new(id, data));

        self.simulate_latency().await;
        Ok(result)
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
        merge: bool,
    ) -> Result<()> {
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_failure()?;

        let mut collections = lock(&self.collections);
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.get_mut(id) {
            Some(existing) if merge => existing.extend(data),
            _ => {
                docs.insert(id.to_string(), data);
            }
        }
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Map<String, Value>) -> Result<()> {
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_failure()?;

        let mut collections = lock(&self.collections);
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| CacheError::NotFound(format!("{}/{}", collection, id)))?;
        existing.extend(patch);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_failure()?;

        if let Some(docs) = lock(&self.collections).get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{limit, order_by, where_, FilterOp};
    use serde_json::json;

    fn seeded() -> MemoryRemoteStore {
        let store = MemoryRemoteStore::new();
        store.seed(
            "classes",
            "c1",
            json!({"name": "Algebra", "studentEmails": ["a@x.com"], "start": 3}),
        );
        store.seed(
            "classes",
            "c2",
            json!({"name": "Biology", "studentEmails": ["a@x.com", "b@x.com"], "start": 1}),
        );
        store.seed(
            "classes",
            "c3",
            json!({"name": "Chemistry", "studentEmails": ["b@x.com"], "start": 2}),
        );
        store
    }

    #[tokio::test]
    async fn test_query_filters_orders_and_limits() {
        let store = seeded();

        let docs = store
            .query(
                "classes",
                &[
                    where_("studentEmails", FilterOp::ArrayContains, "a@x.com"),
                    order_by("start", Direction::Asc),
                ],
            )
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);

        let docs = store
            .query("classes", &[order_by("start", Direction::Desc), limit(1)])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "c1");
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_empty() {
        let store = MemoryRemoteStore::new();
        assert!(store.query("nothing", &[]).await.unwrap().is_empty());
        assert_eq!(store.get("nothing", "x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_merge_and_update() {
        let store = seeded();

        let patch = json!({"room": "B12"}).as_object().cloned().unwrap();
        store.set("classes", "c1", patch.clone(), true).await.unwrap();
        assert_eq!(store.peek("classes", "c1").unwrap()["name"], "Algebra");

        store.set("classes", "c1", patch, false).await.unwrap();
        assert!(store.peek("classes", "c1").unwrap().get("name").is_none());

        let rename = json!({"name": "Physics"}).as_object().cloned().unwrap();
        store.update("classes", "c3", rename.clone()).await.unwrap();
        assert_eq!(store.peek("classes", "c3").unwrap()["name"], "Physics");

        let err = store.update("classes", "missing", rename).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
        assert_eq!(store.write_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = seeded();
        store.set_failure(Some(CacheError::Remote("unavailable".to_string())));

        assert!(store.get("classes", "c1").await.is_err());
        assert!(store.delete("classes", "c1").await.is_err());
        assert!(store.peek("classes", "c1").is_some());

        store.set_failure(None);
        store.delete("classes", "c1").await.unwrap();
        assert!(store.peek("classes", "c1").is_none());
    }
}
