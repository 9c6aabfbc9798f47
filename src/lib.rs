//! Tutor Cache - client-side caching for a tutoring app's document store
//!
//! Provides TTL caching with identity-scoped keys, in-flight request
//! deduplication, write-driven invalidation and change notifications.

pub mod access;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod invalidation;
pub mod notify;
pub mod remote;
pub mod storage;
pub mod tasks;

pub use access::{CacheOptions, CachedAccess, SessionProvider, WriteOptions};
pub use config::Config;
pub use error::{CacheError, Result};
pub use invalidation::IdentityTransition;
pub use notify::{ChangeBus, Subscription};
pub use tasks::spawn_sweep_task;
