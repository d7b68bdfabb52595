//! Storage traits for the proxy's local cache.

use std::sync::Arc;

use async_trait::async_trait;
use depot_core::{CacheInfo, CachedContent, ContentKey, ProxyError};

/// Local cache of proxied content.
///
/// Implementations must be thread-safe (`Send + Sync`); the orchestrator
/// calls into the store from many request tasks concurrently.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Loads cached content for a key.
    ///
    /// Returns `None` if nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::StoreRetryDenied` with a missing-blob cause when
    /// metadata exists but the blob backing it is gone. The orchestrator
    /// treats that case as a cache miss.
    async fn load(&self, key: &ContentKey) -> Result<Option<CachedContent>, ProxyError>;

    /// Stores content for a key and returns the stored form.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Store` for infrastructure failures.
    async fn store(
        &self,
        key: &ContentKey,
        content: CachedContent,
    ) -> Result<CachedContent, ProxyError>;

    /// Replaces the cache info of an existing entry without touching its bytes.
    ///
    /// A missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Store` for infrastructure failures.
    async fn mark_verified(&self, key: &ContentKey, info: &CacheInfo) -> Result<(), ProxyError>;
}

/// Shared, type-erased content store.
pub type DynContentStore = Arc<dyn ContentStore>;
