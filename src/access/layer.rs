//! Cached Access Layer
//!
//! Read-through and write-then-invalidate operations over the remote store.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::keys;
use super::options::{CacheOptions, WriteOptions};
use crate::cache::{CacheStats, CacheStore};
use crate::config::Config;
use crate::dedup::PendingRegistry;
use crate::error::{CacheError, Result};
use crate::invalidation::{IdentityTransition, InvalidationPolicy};
use crate::notify::{ChangeBus, Subscription};
use crate::remote::{Document, QueryConstraint, RemoteStore};
use crate::storage::{FileStorage, LocalStorage};

// == Cached Access ==
/// Cache-aware front for the remote document store.
///
/// Reads go cache, then in-flight fetch, then remote. Writes go remote
/// first and only invalidate and notify once the remote write succeeded.
/// Cloning is cheap and every clone shares the same cache.
#[derive(Clone)]
pub struct CachedAccess {
    remote: Arc<dyn RemoteStore>,
    store: Arc<RwLock<CacheStore>>,
    pending: PendingRegistry,
    policy: Arc<InvalidationPolicy>,
    bus: ChangeBus,
    sensitive_collections: Arc<HashSet<String>>,
}

impl std::fmt::Debug for CachedAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedAccess")
            .field("pending", &self.pending)
            .field("bus", &self.bus)
            .field("sensitive_collections", &self.sensitive_collections)
            .finish()
    }
}

impl CachedAccess {
    // == Constructor ==
    /// Wraps `remote` with `store`. Only `users` is treated as sensitive.
    pub fn new(remote: Arc<dyn RemoteStore>, store: CacheStore) -> Self {
        Self {
            remote,
            store: Arc::new(RwLock::new(store)),
            pending: PendingRegistry::new(),
            policy: Arc::new(InvalidationPolicy::new()),
            bus: ChangeBus::new(),
            sensitive_collections: Arc::new(
                Config::default().sensitive_collections.into_iter().collect(),
            ),
        }
    }

    /// Builds the store described by `config`.
    ///
    /// When persistence is on but the storage file cannot be opened the
    /// cache runs memory-only.
    pub fn from_config(config: &Config, remote: Arc<dyn RemoteStore>) -> Self {
        let store = if config.persist {
            match config
                .resolved_storage_path()
                .and_then(|path| FileStorage::open(path))
            {
                Ok(storage) => {
                    info!(path = %storage.path().display(), "Cache persistence enabled");
                    let storage: Arc<dyn LocalStorage> = Arc::new(storage);
                    CacheStore::with_storage(
                        config.max_entries,
                        config.default_ttl,
                        Arc::new(crate::clock::SystemClock),
                        storage,
                    )
                }
                Err(e) => {
                    warn!(error = %e, "Local storage unavailable, cache is memory-only");
                    CacheStore::new(config.max_entries, config.default_ttl)
                }
            }
        } else {
            CacheStore::new(config.max_entries, config.default_ttl)
        };

        Self::new(remote, store)
            .with_sensitive_collections(config.sensitive_collections.iter().cloned())
    }

    /// Replaces the set of collections read fresh during a masquerade.
    pub fn with_sensitive_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_collections = Arc::new(collections.into_iter().map(Into::into).collect());
        self
    }

    // == Reads ==
    /// Returns the documents of `collection` matching `constraints`.
    pub async fn get_cached_collection<T: DeserializeOwned>(
        &self,
        collection: &str,
        constraints: &[QueryConstraint],
        options: &CacheOptions,
    ) -> Result<Vec<T>> {
        let key = keys::collection_key(collection, constraints, options.acting_identity()?);
        let bypass = self.should_bypass(collection, options);

        if !bypass {
            if let Some(hit) = self.store.write().await.get::<Vec<T>>(&key) {
                return Ok(hit);
            }
        }

        let remote = Arc::clone(&self.remote);
        let name = collection.to_string();
        let constraints = constraints.to_vec();
        let value = self
            .load(collection, &key, options.ttl_seconds, bypass, move || async move {
                let docs = remote.query(&name, &constraints).await?;
                Ok(Value::Array(
                    docs.into_iter().map(Document::into_value).collect(),
                ))
            })
            .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Returns one document, or `None` if it does not exist. Absence is
    /// cached like any other result.
    pub async fn get_cached_document<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        options: &CacheOptions,
    ) -> Result<Option<T>> {
        let key = keys::document_key(collection, id, options.acting_identity()?);
        let bypass = self.should_bypass(collection, options);

        if !bypass {
            if let Some(hit) = self.store.write().await.get::<Option<T>>(&key) {
                return Ok(hit);
            }
        }

        let remote = Arc::clone(&self.remote);
        let name = collection.to_string();
        let id = id.to_string();
        let value = self
            .load(collection, &key, options.ttl_seconds, bypass, move || async move {
                let doc = remote.get(&name, &id).await?;
                Ok(doc.map(Document::into_value).unwrap_or(Value::Null))
            })
            .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Runs `fetch` for a missed `key` and caches its result.
    ///
    /// Callers that miss on the same key while a fetch is in flight share
    /// it. The result is only cached if `collection` was not invalidated
    /// since the fetch began; otherwise it is returned to the waiting
    /// callers and dropped.
    async fn load<F, Fut>(
        &self,
        collection: &str,
        key: &str,
        ttl: Option<u64>,
        bypass: bool,
        fetch: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let generation = self.policy.generation(collection);
        let job = {
            let store = Arc::clone(&self.store);
            let policy = Arc::clone(&self.policy);
            let collection = collection.to_string();
            let key = key.to_string();
            move || {
                let fut = fetch();
                async move {
                    let value = fut.await?;
                    let mut store = store.write().await;
                    if policy.is_current(&collection, generation) {
                        store.set_value(&key, value.clone(), ttl);
                    } else {
                        debug!(key = %key, generation = %generation, "Discarding result of invalidated fetch");
                    }
                    Ok::<Value, CacheError>(value)
                }
            }
        };

        if bypass {
            debug!(key = %key, "Cache bypassed");
            return job().await;
        }

        // Fetches started before an invalidation are not joined afterwards
        let pending_key = format!("{}@{}", key, generation);
        self.pending.get_or_create(&pending_key, job).await
    }

    fn should_bypass(&self, collection: &str, options: &CacheOptions) -> bool {
        if options.bypass_cache {
            return true;
        }
        let forced = options.is_masquerading() && self.sensitive_collections.contains(collection);
        if forced {
            debug!(collection = %collection, "Sensitive read during masquerade, bypassing cache");
        }
        forced
    }

    // == Writes ==
    /// Writes a whole document. `options.merge` keeps fields absent from
    /// `data`.
    pub async fn set_cached_document<T: Serialize + ?Sized>(
        &self,
        collection: &str,
        id: &str,
        data: &T,
        options: &WriteOptions,
    ) -> Result<()> {
        let identity = options.acting_identity()?;
        let fields = to_fields(data)?;
        self.remote.set(collection, id, fields, options.merge).await?;
        self.after_write(
            collection,
            &keys::document_key(collection, id, identity),
            options.subject.as_deref(),
        )
        .await;
        Ok(())
    }

    /// Patches fields of an existing document.
    pub async fn update_cached_document<T: Serialize + ?Sized>(
        &self,
        collection: &str,
        id: &str,
        patch: &T,
        options: &WriteOptions,
    ) -> Result<()> {
        let identity = options.acting_identity()?;
        let fields = to_fields(patch)?;
        self.remote.update(collection, id, fields).await?;
        self.after_write(
            collection,
            &keys::document_key(collection, id, identity),
            options.subject.as_deref(),
        )
        .await;
        Ok(())
    }

    /// Deletes a document. Every cached read of the collection is purged,
    /// whichever identity it was fetched for.
    pub async fn delete_cached_document(&self, collection: &str, id: &str) -> Result<()> {
        self.remote.delete(collection, id).await?;
        let removed = {
            let mut store = self.store.write().await;
            self.policy.invalidate_collection(&mut store, collection)
        };
        let delivered = self.bus.publish(collection);
        debug!(collection = %collection, id = %id, removed, delivered, "Document deleted");
        Ok(())
    }

    async fn after_write(&self, collection: &str, document_key: &str, subject: Option<&str>) {
        let removed = {
            let mut store = self.store.write().await;
            self.policy.after_write(&mut store, collection, document_key)
        };
        let subject = subject.unwrap_or(collection);
        let delivered = self.bus.publish(subject);
        debug!(
            collection = %collection,
            subject = %subject,
            removed,
            delivered,
            "Write applied"
        );
    }

    // == Invalidation ==
    /// Purges every cached read of `collection`.
    pub async fn invalidate_collection(&self, collection: &str) -> usize {
        let mut store = self.store.write().await;
        self.policy.invalidate_collection(&mut store, collection)
    }

    /// Purges several collections at once, for operations whose side
    /// effects reach beyond the collection they write.
    pub async fn invalidate_collections(&self, collections: &[&str]) -> usize {
        let mut store = self.store.write().await;
        let removed = self.policy.invalidate_collections(&mut store, collections);
        info!(collections = ?collections, removed, "Collections invalidated");
        removed
    }

    /// Drops the whole cache on login, logout or a masquerade change.
    pub async fn on_identity_transition(&self, transition: IdentityTransition) {
        let mut store = self.store.write().await;
        self.policy.on_identity_transition(&mut store, transition);
    }

    pub async fn clear_all(&self) {
        let mut store = self.store.write().await;
        self.policy.clear_all(&mut store);
    }

    // == Notifications ==
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub fn publish(&self, subject_id: &str) -> usize {
        self.bus.publish(subject_id)
    }

    // == Introspection ==
    pub async fn stats(&self) -> CacheStats {
        self.store.read().await.stats()
    }

    /// Keys of fetches currently in flight, tagged with their generation.
    pub fn pending_fetches(&self) -> Vec<String> {
        self.pending.pending_keys()
    }

    /// Shared handle to the underlying store, for the background sweep.
    pub fn store(&self) -> Arc<RwLock<CacheStore>> {
        Arc::clone(&self.store)
    }
}

fn to_fields<T: Serialize + ?Sized>(data: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(data)? {
        Value::Object(fields) => Ok(fields),
        other => Err(CacheError::InvalidRequest(format!(
            "document data must be an object, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
