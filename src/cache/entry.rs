//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Entry ==
/// A single cached value with its expiry metadata.
///
/// The value is stored type-erased as JSON; this is also the exact shape
/// mirrored into the durable local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry that expires `ttl_seconds` after `now_ms`.
    pub fn new(value: Value, now_ms: u64, ttl_seconds: u64) -> Self {
        Self {
            value,
            created_at: now_ms,
            expires_at: now_ms.saturating_add(ttl_seconds.saturating_mul(1000)),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// An entry is expired once `now_ms >= expires_at`, so a TTL of `t`
    /// seconds is served strictly before `t` has elapsed and never at `t`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, zero once expired.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }

    /// Returns remaining TTL in whole seconds.
    pub fn ttl_remaining(&self, now_ms: u64) -> u64 {
        self.ttl_remaining_ms(now_ms) / 1000
    }

    /// Age of the entry in milliseconds.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new(json!({"name": "Ada"}), 1_000, 60);

        assert_eq!(entry.value["name"], "Ada");
        assert_eq!(entry.created_at, 1_000);
        assert_eq!(entry.expires_at, 61_000);
        assert!(!entry.is_expired(1_000));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new(json!(1), 0, 10);

        assert!(!entry.is_expired(9_999));
        // Expired exactly at the TTL boundary
        assert!(entry.is_expired(10_000));
        assert!(entry.is_expired(10_001));
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let entry = CacheEntry::new(json!("x"), 500, 0);
        assert!(entry.is_expired(500));
    }

    #[test]
    fn test_ttl_remaining() {
        let entry = CacheEntry::new(json!(null), 0, 10);

        assert_eq!(entry.ttl_remaining_ms(2_500), 7_500);
        assert_eq!(entry.ttl_remaining(2_500), 7);
        assert_eq!(entry.ttl_remaining_ms(20_000), 0);
    }

    #[test]
    fn test_age() {
        let entry = CacheEntry::new(json!(null), 1_000, 10);
        assert_eq!(entry.age_ms(4_000), 3_000);
        assert_eq!(entry.age_ms(0), 0);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::new(json!(null), u64::MAX - 5, u64::MAX);
        assert_eq!(entry.expires_at, u64::MAX);
    }

    #[test]
    fn test_entry_serde_shape() {
        let entry = CacheEntry::new(json!([1, 2]), 1, 1);
        let text = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&text).unwrap();
        assert_eq!(back, entry);
        assert!(text.contains("\"expires_at\":1001"));
    }
}
