//! Durable Local Storage Module
//!
//! String key to string value persistence that survives a restart. The TTL
//! store mirrors its entries here and rehydrates from it on startup.
//!
//! Implementations may fail at any time (quota, I/O). Callers in this crate
//! treat every failure as "no persistence this time".

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::Result;

/// Simple persistent key/value store with no transactions.
pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;

    fn clear(&self) -> Result<()>;
}
