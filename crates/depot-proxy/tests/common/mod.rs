#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use depot_core::{CacheInfo, CachedContent, ContentKey, ProxyError, now_utc};
use depot_proxy::{CooperationConfig, FetchOutcome, FreshContent, Origin, ProxyOrchestrator};
use depot_storage::InMemoryContentStore;
use tokio::sync::Barrier;

/// Origin with a fixed latency and a swappable response.
pub struct MockOrigin {
    delay: Duration,
    response: Mutex<Result<Option<FetchOutcome>, ProxyError>>,
    calls: AtomicUsize,
}

impl MockOrigin {
    pub fn new(delay: Duration, response: Result<Option<FetchOutcome>, ProxyError>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            response: Mutex::new(response),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn serving(body: &'static str, delay: Duration) -> Arc<Self> {
        Self::new(delay, Ok(Some(FetchOutcome::Fresh(FreshContent::new(body)))))
    }

    pub fn failing(error: ProxyError, delay: Duration) -> Arc<Self> {
        Self::new(delay, Err(error))
    }

    pub fn respond(&self, response: Result<Option<FetchOutcome>, ProxyError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Origin for MockOrigin {
    async fn fetch(
        &self,
        _key: &ContentKey,
        _hint: Option<&CachedContent>,
    ) -> Result<Option<FetchOutcome>, ProxyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.response.lock().unwrap().clone()
    }
}

pub fn key(path: &str) -> ContentKey {
    ContentKey::new("test-proxy", path).unwrap()
}

pub fn cooperation(major: Duration, minor: Duration) -> CooperationConfig {
    CooperationConfig {
        enabled: true,
        major_timeout: major,
        minor_timeout: minor,
        threads_per_key: 100,
    }
}

pub fn proxy(
    store: Arc<InMemoryContentStore>,
    origin: Arc<MockOrigin>,
    max_age: Option<Duration>,
    cooperation: CooperationConfig,
) -> Arc<ProxyOrchestrator> {
    Arc::new(
        ProxyOrchestrator::builder("test-proxy", store, origin)
            .with_max_age(max_age)
            .with_cooperation(cooperation)
            .build(),
    )
}

/// Content checked two days ago; stale under any short max-age.
pub fn stale_content(body: &'static str) -> CachedContent {
    let checked = now_utc() - time::Duration::days(2);
    CachedContent::new(body).with_cache_info(CacheInfo::new(checked, None, None))
}

/// Runs `clients` concurrent gets for `key`, released together.
pub async fn burst(
    proxy: &Arc<ProxyOrchestrator>,
    key: &ContentKey,
    clients: usize,
) -> Vec<Result<Option<CachedContent>, ProxyError>> {
    let barrier = Arc::new(Barrier::new(clients));
    let handles: Vec<_> = (0..clients)
        .map(|_| {
            let proxy = Arc::clone(proxy);
            let key = key.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                proxy.get(&key).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(clients);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}
