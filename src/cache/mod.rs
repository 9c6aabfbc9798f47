//! Cache Module
//!
//! In-process TTL cache with prefix invalidation, LRU capacity bound, and
//! durable mirroring.

mod entry;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use stats::CacheStats;
pub use store::CacheStore;

/// Default TTL in seconds for cached reads
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Default capacity of the store
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
