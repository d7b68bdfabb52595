//! Upstream origin abstraction.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use depot_core::{CachedContent, ContentKey, ProxyError, Validator};

/// Content freshly downloaded from an origin, not yet stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshContent {
    pub payload: Bytes,
    pub content_type: Option<String>,
    pub validator: Option<Validator>,
}

impl FreshContent {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            content_type: None,
            validator: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator.non_empty();
        self
    }
}

/// Result of a successful origin round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New bytes that must be stored.
    Fresh(FreshContent),
    /// The cached copy passed as hint is still current; nothing to store.
    Unchanged,
}

/// Upstream source of proxied content.
#[async_trait]
pub trait Origin: Send + Sync {
    /// Fetches `key` from upstream.
    ///
    /// `hint` is the currently cached copy, if any; implementations may use
    /// it for conditional requests and answer [`FetchOutcome::Unchanged`].
    /// Returns `None` when the origin has nothing at this path.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::OriginServiceUnavailable`, `ProxyError::OriginBlocked`
    /// or `ProxyError::OriginIo` depending on how the origin failed.
    async fn fetch(
        &self,
        key: &ContentKey,
        hint: Option<&CachedContent>,
    ) -> Result<Option<FetchOutcome>, ProxyError>;
}

pub type DynOrigin = Arc<dyn Origin>;
