//! Background Tasks Module
//!
//! Contains background tasks that keep the cache tidy while it is in use.
//!
//! # Tasks
//! - Expiry Sweep: Removes expired cache entries at a configured interval.
//!   Lazy expiry on read is always on; the sweep only bounds memory held by
//!   entries nobody reads again.

mod sweep;

pub use sweep::spawn_sweep_task;
