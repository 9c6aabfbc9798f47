//! Configuration Module
//!
//! Handles loading cache settings from environment variables.

use std::env;
use std::path::PathBuf;

use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL_SECS};
use crate::storage::FileStorage;

/// Cache layer configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// TTL in seconds for results cached without an explicit TTL
    pub default_ttl: u64,
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// Background sweep interval in seconds; 0 disables the sweep
    pub sweep_interval: u64,
    /// Mirror entries into durable local storage
    pub persist: bool,
    /// Storage file; the platform cache directory when `None`
    pub storage_path: Option<PathBuf>,
    /// Collections always read fresh while a masquerade is active
    pub sensitive_collections: Vec<String>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `CACHE_SWEEP_INTERVAL` - Sweep frequency in seconds, 0 = off (default: 0)
    /// - `CACHE_PERSIST` - Mirror into local storage (default: true)
    /// - `CACHE_STORAGE_PATH` - Storage file (default: `<cache_dir>/tutor_cache/cache.json`)
    /// - `CACHE_SENSITIVE_COLLECTIONS` - Comma separated list (default: users)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: env::var("CACHE_DEFAULT_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_ttl),
            max_entries: env::var("CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_entries),
            sweep_interval: env::var("CACHE_SWEEP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sweep_interval),
            persist: env::var("CACHE_PERSIST")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.persist),
            storage_path: env::var("CACHE_STORAGE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            sensitive_collections: env::var("CACHE_SENSITIVE_COLLECTIONS")
                .ok()
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.sensitive_collections),
        }
    }

    /// Storage file to use: the configured path or the platform default.
    pub fn resolved_storage_path(&self) -> crate::error::Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => FileStorage::default_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: 0,
            persist: true,
            storage_path: None,
            sensitive_collections: vec!["users".to_string()],
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "CACHE_DEFAULT_TTL",
        "CACHE_MAX_ENTRIES",
        "CACHE_SWEEP_INTERVAL",
        "CACHE_PERSIST",
        "CACHE_STORAGE_PATH",
        "CACHE_SENSITIVE_COLLECTIONS",
    ];

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.sweep_interval, 0);
        assert!(config.persist);
        assert_eq!(config.storage_path, None);
        assert_eq!(config.sensitive_collections, vec!["users".to_string()]);
    }

    // Single test touching the environment so parallel tests do not race.
    #[test]
    fn test_config_from_env() {
        for var in VARS {
            env::remove_var(var);
        }
        assert_eq!(Config::from_env(), Config::default());

        env::set_var("CACHE_DEFAULT_TTL", "60");
        env::set_var("CACHE_MAX_ENTRIES", "50");
        env::set_var("CACHE_SWEEP_INTERVAL", "5");
        env::set_var("CACHE_PERSIST", "off");
        env::set_var("CACHE_STORAGE_PATH", "/tmp/tutor.json");
        env::set_var("CACHE_SENSITIVE_COLLECTIONS", "users, payments,,");

        let config = Config::from_env();
        assert_eq!(config.default_ttl, 60);
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.sweep_interval, 5);
        assert!(!config.persist);
        assert_eq!(config.storage_path, Some(PathBuf::from("/tmp/tutor.json")));
        assert_eq!(
            config.sensitive_collections,
            vec!["users".to_string(), "payments".to_string()]
        );

        // Unparseable values fall back to defaults
        env::set_var("CACHE_DEFAULT_TTL", "soon");
        env::set_var("CACHE_MAX_ENTRIES", "0");
        env::set_var("CACHE_PERSIST", "maybe");
        let config = Config::from_env();
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.max_entries, 1000);
        assert!(config.persist);

        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_bool(" YES "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool(""), None);
        assert!(parse_list(" , ").is_empty());
    }
}
