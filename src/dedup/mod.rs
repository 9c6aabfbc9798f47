//! Request Deduplication Module
//!
//! Collapses concurrent fetches for the same derived key into one
//! underlying call. Every caller awaits a clone of the same shared future
//! and so observes the same value or the same error.

mod registry;

pub use registry::{PendingFetch, PendingRegistry};
