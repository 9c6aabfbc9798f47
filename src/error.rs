//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
///
/// Variants carry strings so the type is `Clone`: a single failed fetch is
/// handed to every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The remote document store rejected or failed the operation
    #[error("Remote store error: {0}")]
    Remote(String),

    /// Target document does not exist in the remote store
    #[error("Document not found: {0}")]
    NotFound(String),

    /// A value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The durable local store failed (quota, I/O)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid arguments from the caller
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::Remote("permission-denied".to_string());
        assert_eq!(err.to_string(), "Remote store error: permission-denied");
    }

    #[test]
    fn test_from_serde_error() {
        let err: CacheError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = CacheError::NotFound("users/u1".to_string());
        assert_eq!(err.clone(), err);
    }
}
