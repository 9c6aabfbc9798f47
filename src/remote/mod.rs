//! Remote Document Store Module
//!
//! The boundary to the managed document database. The access layer treats
//! it as the source of truth and assumes it caches nothing itself.

mod memory;
mod query;

pub use memory::MemoryRemoteStore;
pub use query::{limit, order_by, where_, Direction, Filter, FilterOp, QueryConstraint};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// A document as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// The field map with an `id` field added, which is the shape callers
    /// deserialize their own types from. A stored `id` field is overridden.
    pub fn into_value(self) -> Value {
        let mut data = self.data;
        data.insert("id".to_string(), Value::String(self.id));
        Value::Object(data)
    }
}

/// Collection-based CRUD over the remote document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Runs a query with server-side filtering, ordering and limiting.
    async fn query(&self, collection: &str, constraints: &[QueryConstraint])
        -> Result<Vec<Document>>;

    /// Fetches one document; `None` when it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Writes a whole document. `merge` keeps fields not present in `data`.
    async fn set(&self, collection: &str, id: &str, data: Map<String, Value>, merge: bool)
        -> Result<()>;

    /// Patches fields of an existing document. Fails if it does not exist.
    async fn update(&self, collection: &str, id: &str, patch: Map<String, Value>) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;
}
