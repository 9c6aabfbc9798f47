//! Per-call options for cached reads and writes.
//!
//! Every call names the acting user explicitly. The access layer never
//! reaches into session state on its own; [`SessionProvider`] is only a
//! convenience for building options at the edge.

use crate::error::{CacheError, Result};

/// Source of the current authenticated and impersonated subjects.
pub trait SessionProvider {
    /// Authenticated subject, `None` when signed out.
    fn current_user_id(&self) -> Option<String>;

    /// Subject being impersonated, if a masquerade is active.
    fn masquerade_target(&self) -> Option<String>;
}

/// Options for a cached read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheOptions {
    /// Authenticated subject issuing the read
    pub user_id: String,
    /// Impersonated subject; when set it is the acting identity
    pub masquerade_as: Option<String>,
    /// Skip the cache lookup and go straight to the remote store
    pub bypass_cache: bool,
    /// TTL for the stored result; the store default when `None`
    pub ttl_seconds: Option<u64>,
}

impl CacheOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Builds options for whoever the session says is signed in.
    pub fn from_session(session: &dyn SessionProvider) -> Result<Self> {
        let user_id = session
            .current_user_id()
            .ok_or_else(|| CacheError::InvalidRequest("no authenticated user".to_string()))?;
        Ok(Self {
            user_id,
            masquerade_as: session.masquerade_target(),
            ..Self::default()
        })
    }

    pub fn masquerading_as(mut self, target: impl Into<String>) -> Self {
        self.masquerade_as = Some(target.into());
        self
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn is_masquerading(&self) -> bool {
        self.masquerade_as.is_some()
    }

    /// Identity the cache key is scoped to.
    pub fn acting_identity(&self) -> Result<&str> {
        acting_identity(&self.user_id, self.masquerade_as.as_deref())
    }
}

/// Options for a write through the access layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteOptions {
    pub user_id: String,
    pub masquerade_as: Option<String>,
    /// For `set`: keep fields absent from the new data
    pub merge: bool,
    /// Subject published on the change bus; the collection name otherwise
    pub subject: Option<String>,
}

impl WriteOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn from_session(session: &dyn SessionProvider) -> Result<Self> {
        let read = CacheOptions::from_session(session)?;
        Ok(Self {
            user_id: read.user_id,
            masquerade_as: read.masquerade_as,
            ..Self::default()
        })
    }

    pub fn masquerading_as(mut self, target: impl Into<String>) -> Self {
        self.masquerade_as = Some(target.into());
        self
    }

    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn acting_identity(&self) -> Result<&str> {
        acting_identity(&self.user_id, self.masquerade_as.as_deref())
    }
}

fn acting_identity<'a>(user_id: &'a str, masquerade_as: Option<&'a str>) -> Result<&'a str> {
    if user_id.is_empty() {
        return Err(CacheError::InvalidRequest("user_id is required".to_string()));
    }
    match masquerade_as {
        Some("") => Err(CacheError::InvalidRequest(
            "masquerade target is empty".to_string(),
        )),
        Some(target) => Ok(target),
        None => Ok(user_id),
    }
}
