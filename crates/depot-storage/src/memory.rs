//! In-memory content store backed by `DashMap`.

use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use depot_core::{CacheInfo, CachedContent, ContentKey, ProxyError};

use crate::traits::ContentStore;

#[derive(Debug, Clone)]
struct StoredEntry {
    content: CachedContent,
    /// Cleared when the blob is lost while the metadata survives.
    blob_present: bool,
}

/// In-memory content store.
///
/// Besides plain storage it can simulate two failure modes of a real blob
/// store: an entry whose blob has gone missing, and writes that fail.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    entries: DashMap<ContentKey, StoredEntry>,
    write_failure: ArcSwapOption<ProxyError>,
    loads: AtomicUsize,
    stores: AtomicUsize,
    verifications: AtomicUsize,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops the blob behind `key` but keeps its metadata, so later loads
    /// fail with a missing-blob error. Returns false if nothing was stored.
    pub fn remove_blob(&self, key: &ContentKey) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.blob_present = false;
                tracing::debug!(key = %key, "Dropped blob, metadata kept");
                true
            }
            None => false,
        }
    }

    /// Makes every subsequent `store` and `mark_verified` fail with `error`.
    /// Pass `None` to restore normal writes.
    pub fn fail_writes(&self, error: Option<ProxyError>) {
        self.write_failure.store(error.map(Into::into));
    }

    /// Cached content without touching the load counter.
    pub fn peek(&self, key: &ContentKey) -> Option<CachedContent> {
        self.entries.get(key).map(|e| e.content.clone())
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn verification_count(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), ProxyError> {
        match self.write_failure.load_full() {
            Some(err) => Err(err.as_ref().clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn load(&self, key: &ContentKey) -> Result<Option<CachedContent>, ProxyError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match self.entries.get(key) {
            Some(entry) if !entry.blob_present => Err(ProxyError::missing_blob(key.to_string())),
            Some(entry) => Ok(Some(entry.content.clone())),
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        key: &ContentKey,
        content: CachedContent,
    ) -> Result<CachedContent, ProxyError> {
        self.check_writable()?;
        self.stores.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(key = %key, size = content.size(), "Storing content");
        self.entries.insert(
            key.clone(),
            StoredEntry {
                content: content.clone(),
                blob_present: true,
            },
        );
        Ok(content)
    }

    async fn mark_verified(&self, key: &ContentKey, info: &CacheInfo) -> Result<(), ProxyError> {
        self.check_writable()?;
        self.verifications.fetch_add(1, Ordering::SeqCst);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.content.set_cache_info(info.clone());
            }
            None => {
                tracing::debug!(key = %key, "Verified entry no longer cached");
            }
        }
        Ok(())
    }
}
