//! Get/fetch/store/fallback protocol for a proxy repository.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use depot_core::{
    CacheControllerHolder, CachedContent, ContentClass, ContentKey, ProxyError, Result, now_utc,
};
use depot_storage::DynContentStore;
use tracing::{debug, info, trace, warn};

use crate::classifier::{ContentClassifier, DefaultClassifier};
use crate::cooperation::{Cooperation, CooperationConfig};
use crate::origin::{DynOrigin, FetchOutcome};

/// Default max-age for both content classes: 24 hours.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Serves a repository's content from the local store, refreshing it from
/// the origin when stale and falling back to the stale copy when the origin
/// fails.
pub struct ProxyOrchestrator {
    repository: String,
    store: DynContentStore,
    origin: DynOrigin,
    controllers: Arc<CacheControllerHolder>,
    classifier: Arc<dyn ContentClassifier>,
    cooperation: Cooperation<Option<CachedContent>>,
}

impl ProxyOrchestrator {
    pub fn builder(
        repository: impl Into<String>,
        store: DynContentStore,
        origin: DynOrigin,
    ) -> ProxyOrchestratorBuilder {
        ProxyOrchestratorBuilder::new(repository, store, origin)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn cache_controllers(&self) -> &CacheControllerHolder {
        &self.controllers
    }

    pub fn cooperation_config(&self) -> &CooperationConfig {
        self.cooperation.config()
    }

    /// Returns content for `key`, or `None` when neither the cache nor the
    /// origin has it.
    ///
    /// # Errors
    ///
    /// Store load failures other than a missing blob propagate immediately.
    /// Fetch failures propagate only when nothing usable is cached or the
    /// error is not eligible for fallback.
    pub async fn get(&self, key: &ContentKey) -> Result<Option<CachedContent>> {
        crate::metrics::record_request(&self.repository);
        let cached = self.load_cached(key).await?;
        let class = self.classifier.classify(key);

        if let Some(content) = &cached {
            if !self.controllers.get(class).is_stale(content.cache_info()) {
                trace!(repository = %self.repository, key = %key, "Serving cached content");
                crate::metrics::record_cache_hit(&self.repository);
                return Ok(cached);
            }
        }

        let fetch = {
            let repository = self.repository.clone();
            let store = Arc::clone(&self.store);
            let origin = Arc::clone(&self.origin);
            let controllers = Arc::clone(&self.controllers);
            let key = key.clone();
            let hint = cached.clone();
            move || refresh(repository, store, origin, controllers, class, key, hint)
        };
        // Another round may have refreshed the entry since our load.
        let check = {
            let store = Arc::clone(&self.store);
            let controllers = Arc::clone(&self.controllers);
            let key = key.clone();
            move || cached_if_fresh(Arc::clone(&store), Arc::clone(&controllers), class, key.clone())
        };

        match self.cooperation.cooperate_checked(key, fetch, check).await {
            Ok(content) => Ok(content),
            Err(err) => self.handle_fetch_error(key, cached, err),
        }
    }

    /// Makes every cached entry stale by rotating the cache tokens.
    pub fn invalidate_caches(&self) {
        info!(repository = %self.repository, "Invalidating proxy caches");
        self.controllers.invalidate_caches();
    }

    /// Applies new max-ages; entries are re-evaluated against them on next access.
    pub fn set_max_age(&self, class: ContentClass, max_age: Option<Duration>) {
        info!(repository = %self.repository, class = %class, max_age = ?max_age, "Updating max age");
        self.controllers.get(class).set_max_age(max_age);
    }

    /// Callers cooperating on each key that currently has a fetch in flight.
    pub fn thread_count_per_key(&self) -> HashMap<ContentKey, usize> {
        self.cooperation.thread_count_per_key()
    }

    async fn load_cached(&self, key: &ContentKey) -> Result<Option<CachedContent>> {
        match self.store.load(key).await {
            Ok(content) => Ok(content),
            Err(err) if err.is_missing_blob() => {
                warn!(
                    repository = %self.repository,
                    key = %key,
                    error = %err,
                    "Unable to find blob, will check remote"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn handle_fetch_error(
        &self,
        key: &ContentKey,
        cached: Option<CachedContent>,
        err: ProxyError,
    ) -> Result<Option<CachedContent>> {
        match cached {
            Some(content) if err.is_fallback_eligible() => {
                crate::metrics::record_fallback(&self.repository, &err.category().to_string());
                warn!(
                    repository = %self.repository,
                    key = %key,
                    error = %err,
                    category = %err.category(),
                    "Exception checking remote for update, serving cached content"
                );
                Ok(Some(content))
            }
            Some(_) => {
                warn!(repository = %self.repository, key = %key, error = %err, "Refresh failed");
                Err(err)
            }
            None if err.is_blocked() => {
                trace!(repository = %self.repository, key = %key, error = %err, "Remote blocked");
                Err(err)
            }
            None => {
                warn!(
                    repository = %self.repository,
                    key = %key,
                    error = %err,
                    category = %err.category(),
                    "Exception fetching remote, nothing cached"
                );
                Err(err)
            }
        }
    }
}

/// Cached content for `key` if it is present and fresh, wrapped for
/// [`Cooperation::cooperate_checked`].
async fn cached_if_fresh(
    store: DynContentStore,
    controllers: Arc<CacheControllerHolder>,
    class: ContentClass,
    key: ContentKey,
) -> Option<Option<CachedContent>> {
    match store.load(&key).await {
        Ok(Some(content)) if !controllers.get(class).is_stale(content.cache_info()) => {
            Some(Some(content))
        }
        Ok(_) => None,
        Err(err) => {
            debug!(key = %key, error = %err, "Unable to re-check cached content");
            None
        }
    }
}

/// Leader side of a fetch round: ask the origin, then store or mark verified.
async fn refresh(
    repository: String,
    store: DynContentStore,
    origin: DynOrigin,
    controllers: Arc<CacheControllerHolder>,
    class: ContentClass,
    key: ContentKey,
    hint: Option<CachedContent>,
) -> Result<Option<CachedContent>> {
    let controller = controllers.get(class);
    let fetched = origin.fetch(&key, hint.as_ref()).await;
    let outcome = match &fetched {
        Ok(Some(FetchOutcome::Fresh(_))) => "fresh",
        Ok(Some(FetchOutcome::Unchanged)) => "unchanged",
        Ok(None) => "absent",
        Err(_) => "error",
    };
    crate::metrics::record_origin_fetch(&repository, outcome);
    match fetched? {
        Some(FetchOutcome::Fresh(fresh)) => {
            let mut content = CachedContent::new(fresh.payload)
                .with_cache_info(controller.current(fresh.validator));
            if let Some(content_type) = fresh.content_type {
                content = content.with_content_type(content_type);
            }
            debug!(key = %key, size = content.size(), "Storing fetched content");
            store.store(&key, content).await.map(Some)
        }
        Some(FetchOutcome::Unchanged) => {
            let Some(mut content) = hint else {
                return Err(ProxyError::io(format!(
                    "Origin reported {key} unchanged but nothing is cached"
                )));
            };
            let info = match content.cache_info() {
                Some(info) => info.verified(now_utc(), controller.cache_token()),
                None => controller.current(None),
            };
            debug!(key = %key, "Content verified unchanged");
            store.mark_verified(&key, &info).await?;
            content.set_cache_info(info);
            Ok(Some(content))
        }
        None => {
            debug!(key = %key, "Origin has no content");
            Ok(hint)
        }
    }
}

pub struct ProxyOrchestratorBuilder {
    repository: String,
    store: DynContentStore,
    origin: DynOrigin,
    controllers: Option<CacheControllerHolder>,
    classifier: Arc<dyn ContentClassifier>,
    cooperation: CooperationConfig,
}

impl ProxyOrchestratorBuilder {
    pub fn new(repository: impl Into<String>, store: DynContentStore, origin: DynOrigin) -> Self {
        Self {
            repository: repository.into(),
            store,
            origin,
            controllers: None,
            classifier: Arc::new(DefaultClassifier),
            cooperation: CooperationConfig::default(),
        }
    }

    pub fn with_cache_controllers(mut self, controllers: CacheControllerHolder) -> Self {
        self.controllers = Some(controllers);
        self
    }

    /// Same max-age for content and metadata.
    pub fn with_max_age(self, max_age: Option<Duration>) -> Self {
        self.with_cache_controllers(CacheControllerHolder::uniform(max_age))
    }

    pub fn with_classifier(mut self, classifier: impl ContentClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_cooperation(mut self, config: CooperationConfig) -> Self {
        self.cooperation = config;
        self
    }

    pub fn build(self) -> ProxyOrchestrator {
        let controllers = self
            .controllers
            .unwrap_or_else(|| CacheControllerHolder::uniform(Some(DEFAULT_MAX_AGE)));
        if self.cooperation.is_active() {
            debug!(repository = %self.repository, config = ?self.cooperation, "Proxy cooperation enabled");
        } else {
            debug!(repository = %self.repository, "Proxy cooperation disabled");
        }
        ProxyOrchestrator {
            cooperation: Cooperation::new(format!("{}:proxy", self.repository), self.cooperation),
            repository: self.repository,
            store: self.store,
            origin: self.origin,
            controllers: Arc::new(controllers),
            classifier: self.classifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::{FreshContent, Origin};
    use async_trait::async_trait;
    use depot_core::{CacheInfo, Validator};
    use depot_storage::{ContentStore, InMemoryContentStore};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Origin that replays a fixed response and records the hints it saw.
    struct ScriptedOrigin {
        response: Mutex<Result<Option<FetchOutcome>>>,
        calls: AtomicUsize,
        hints: Mutex<Vec<Option<CachedContent>>>,
    }

    impl ScriptedOrigin {
        fn new(response: Result<Option<FetchOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(response),
                calls: AtomicUsize::new(0),
                hints: Mutex::new(Vec::new()),
            })
        }

        fn respond(&self, response: Result<Option<FetchOutcome>>) {
            *self.response.lock().unwrap() = response;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Origin for ScriptedOrigin {
        async fn fetch(
            &self,
            _key: &ContentKey,
            hint: Option<&CachedContent>,
        ) -> Result<Option<FetchOutcome>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.hints.lock().unwrap().push(hint.cloned());
            self.response.lock().unwrap().clone()
        }
    }

    fn key() -> ContentKey {
        ContentKey::new("maven-central", "org/acme/1.0/acme-1.0.jar").unwrap()
    }

    fn fresh(body: &'static str) -> Result<Option<FetchOutcome>> {
        Ok(Some(FetchOutcome::Fresh(
            FreshContent::new(body)
                .with_content_type("application/java-archive")
                .with_validator(Validator::new(Some("v1".into()), None)),
        )))
    }

    fn orchestrator(
        store: Arc<InMemoryContentStore>,
        origin: Arc<ScriptedOrigin>,
        max_age: Option<Duration>,
    ) -> ProxyOrchestrator {
        ProxyOrchestrator::builder("maven-central", store, origin)
            .with_max_age(max_age)
            .build()
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(fresh("JAR"));
        let proxy = orchestrator(Arc::clone(&store), Arc::clone(&origin), Some(DEFAULT_MAX_AGE));

        let content = proxy.get(&key()).await.unwrap().unwrap();
        assert_eq!(content.payload().as_ref(), b"JAR");
        assert_eq!(content.content_type(), Some("application/java-archive"));
        let info = content.cache_info().unwrap();
        assert_eq!(info.fetched_at(), info.last_checked_at());
        assert_eq!(info.validator().and_then(|v| v.etag.as_deref()), Some("v1"));
        assert_eq!(store.store_count(), 1);
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_origin() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(fresh("JAR"));
        let proxy = orchestrator(Arc::clone(&store), Arc::clone(&origin), Some(DEFAULT_MAX_AGE));

        proxy.get(&key()).await.unwrap();
        let again = proxy.get(&key()).await.unwrap().unwrap();
        assert_eq!(again.payload().as_ref(), b"JAR");
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_passes_hint_and_verifies_unchanged() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(fresh("JAR"));
        let proxy = orchestrator(Arc::clone(&store), Arc::clone(&origin), Some(Duration::ZERO));

        let first = proxy.get(&key()).await.unwrap().unwrap();
        origin.respond(Ok(Some(FetchOutcome::Unchanged)));

        let second = proxy.get(&key()).await.unwrap().unwrap();
        assert_eq!(second.payload(), first.payload());
        let info = second.cache_info().unwrap();
        assert_eq!(info.fetched_at(), first.cache_info().unwrap().fetched_at());
        assert!(info.last_checked_at() >= first.cache_info().unwrap().last_checked_at());

        assert_eq!(store.store_count(), 1);
        assert_eq!(store.verification_count(), 1);
        assert_eq!(store.peek(&key()).unwrap().cache_info(), Some(info));

        let hints = origin.hints.lock().unwrap();
        assert!(hints[0].is_none());
        assert_eq!(hints[1].as_ref(), Some(&first));
    }

    #[tokio::test]
    async fn test_origin_without_content() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(Ok(None));
        let proxy = orchestrator(Arc::clone(&store), Arc::clone(&origin), Some(Duration::ZERO));

        assert!(proxy.get(&key()).await.unwrap().is_none());

        let cached = CachedContent::new("OLD")
            .with_cache_info(CacheInfo::new(now_utc() - time::Duration::days(2), None, None));
        store.store(&key(), cached.clone()).await.unwrap();
        assert_eq!(proxy.get(&key()).await.unwrap(), Some(cached));
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_to_cached() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(fresh("NEW"));
        let proxy = orchestrator(Arc::clone(&store), Arc::clone(&origin), Some(Duration::ZERO));

        let cached = CachedContent::new("OLD");
        store.store(&key(), cached.clone()).await.unwrap();
        store.fail_writes(Some(ProxyError::store("disk full")));

        assert_eq!(proxy.get(&key()).await.unwrap(), Some(cached));
    }

    #[tokio::test]
    async fn test_non_eligible_error_propagates_despite_cache() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(Err(ProxyError::invalid_path("bad")));
        let proxy = orchestrator(Arc::clone(&store), Arc::clone(&origin), Some(Duration::ZERO));

        store.store(&key(), CachedContent::new("OLD")).await.unwrap();
        let err = proxy.get(&key()).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_caches_forces_refresh() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(fresh("JAR"));
        let proxy = orchestrator(Arc::clone(&store), Arc::clone(&origin), None);

        proxy.get(&key()).await.unwrap();
        proxy.get(&key()).await.unwrap();
        assert_eq!(origin.calls(), 1);

        proxy.invalidate_caches();
        origin.respond(Ok(Some(FetchOutcome::Unchanged)));
        let refreshed = proxy.get(&key()).await.unwrap().unwrap();
        assert_eq!(origin.calls(), 2);
        assert_eq!(
            refreshed.cache_info().and_then(CacheInfo::cache_token).map(str::to_string),
            proxy.cache_controllers().content().cache_token()
        );

        proxy.get(&key()).await.unwrap();
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn test_set_max_age_applies_to_existing_entries() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(fresh("JAR"));
        let proxy = orchestrator(Arc::clone(&store), Arc::clone(&origin), None);

        proxy.get(&key()).await.unwrap();
        proxy.set_max_age(ContentClass::Content, Some(Duration::ZERO));
        proxy.get(&key()).await.unwrap();
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_without_cache_is_an_error() {
        let store = Arc::new(InMemoryContentStore::new());
        let origin = ScriptedOrigin::new(Ok(Some(FetchOutcome::Unchanged)));
        let proxy = orchestrator(store, origin, Some(Duration::ZERO));

        let err = proxy.get(&key()).await.unwrap_err();
        assert!(matches!(err, ProxyError::OriginIo { .. }));
    }

    #[tokio::test]
    async fn test_other_load_errors_propagate() {
        struct BrokenStore;

        #[async_trait]
        impl ContentStore for BrokenStore {
            async fn load(&self, _key: &ContentKey) -> Result<Option<CachedContent>> {
                Err(ProxyError::retry_denied("database locked"))
            }
            async fn store(&self, _key: &ContentKey, content: CachedContent) -> Result<CachedContent> {
                Ok(content)
            }
            async fn mark_verified(&self, _key: &ContentKey, _info: &CacheInfo) -> Result<()> {
                Ok(())
            }
        }

        let origin = ScriptedOrigin::new(fresh("JAR"));
        let proxy = ProxyOrchestrator::builder("maven-central", Arc::new(BrokenStore), Arc::clone(&origin) as DynOrigin)
            .build();

        let err = proxy.get(&key()).await.unwrap_err();
        assert!(matches!(err, ProxyError::StoreRetryDenied { .. }));
        assert_eq!(origin.calls(), 0);
    }

    /// Value of the rendered sample `name` carrying every label in `labels`.
    fn sample(rendered: &str, name: &str, labels: &[&str]) -> Option<String> {
        rendered
            .lines()
            .filter(|line| line.starts_with(name))
            .find(|line| labels.iter().all(|label| line.contains(label)))
            .and_then(|line| line.rsplit(' ').next())
            .map(str::to_string)
    }

    #[test]
    fn test_records_proxy_metrics() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            tokio_test::block_on(async {
                let store = Arc::new(InMemoryContentStore::new());
                let origin = ScriptedOrigin::new(fresh("JAR"));
                let proxy =
                    orchestrator(Arc::clone(&store), Arc::clone(&origin), Some(DEFAULT_MAX_AGE));

                proxy.get(&key()).await.unwrap();
                proxy.get(&key()).await.unwrap();

                proxy.set_max_age(ContentClass::Content, Some(Duration::ZERO));
                origin.respond(Err(ProxyError::io("reset")));
                let served = proxy.get(&key()).await.unwrap().unwrap();
                assert_eq!(served.payload().as_ref(), b"JAR");
            })
        });

        let rendered = handle.render();
        let repo = r#"repository="maven-central""#;
        assert_eq!(sample(&rendered, "depot_proxy_requests_total", &[repo]).as_deref(), Some("3"));
        assert_eq!(sample(&rendered, "depot_proxy_cache_hits_total", &[repo]).as_deref(), Some("1"));
        assert_eq!(
            sample(&rendered, "depot_proxy_origin_fetches_total", &[repo, r#"outcome="fresh""#]).as_deref(),
            Some("1")
        );
        assert_eq!(
            sample(&rendered, "depot_proxy_origin_fetches_total", &[repo, r#"outcome="error""#]).as_deref(),
            Some("1")
        );
        assert_eq!(
            sample(&rendered, "depot_proxy_fallbacks_total", &[repo, r#"category="io""#]).as_deref(),
            Some("1")
        );
    }
}
