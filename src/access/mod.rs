//! Cached Access Module
//!
//! Cache-aware read and write operations over remote collections and
//! documents, scoped to the acting identity.

pub mod keys;
mod layer;
mod options;

pub use layer::CachedAccess;
pub use options::{CacheOptions, SessionProvider, WriteOptions};
