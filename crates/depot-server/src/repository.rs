//! Proxy repositories built from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use depot_core::{CacheController, CacheControllerHolder, ContentClass, ProxyError};
use depot_core::cache::minutes_to_max_age;
use depot_proxy::{HttpOrigin, ProxyOrchestrator, SuffixClassifier};
use depot_storage::InMemoryContentStore;
use tracing::{info, warn};

use crate::config::{AppConfig, RepositoryConfig};

/// A named proxy repository, its remote and the orchestrator serving it.
pub struct ProxyRepository {
    name: String,
    origin: Arc<HttpOrigin>,
    orchestrator: ProxyOrchestrator,
}

impl ProxyRepository {
    pub fn new(name: impl Into<String>, origin: Arc<HttpOrigin>, orchestrator: ProxyOrchestrator) -> Self {
        Self {
            name: name.into(),
            origin,
            orchestrator,
        }
    }

    /// Wire an in-memory store and an HTTP origin for `cfg`.
    pub fn from_config(cfg: &RepositoryConfig) -> Result<Self, ProxyError> {
        let origin = Arc::new(HttpOrigin::new(
            &cfg.remote_url,
            cfg.connect_timeout(),
            cfg.request_timeout(),
        )?);
        origin.set_blocked(cfg.blocked);
        let controllers = CacheControllerHolder::new(
            CacheController::from_minutes(cfg.content_max_age_mins),
            CacheController::from_minutes(cfg.metadata_max_age_mins),
        );
        let orchestrator = ProxyOrchestrator::builder(
            cfg.name.clone(),
            Arc::new(InMemoryContentStore::new()),
            Arc::clone(&origin) as Arc<dyn depot_proxy::Origin>,
        )
        .with_cache_controllers(controllers)
        .with_classifier(SuffixClassifier::new(cfg.metadata_suffixes.iter().cloned()))
        .with_cooperation(cfg.cooperation.to_cooperation_config())
        .build();

        info!(
            repository = %cfg.name,
            remote = %cfg.remote_url,
            content_max_age_mins = cfg.content_max_age_mins,
            metadata_max_age_mins = cfg.metadata_max_age_mins,
            blocked = cfg.blocked,
            "Proxy repository configured"
        );
        Ok(Self::new(cfg.name.clone(), origin, orchestrator))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remote_url(&self) -> &str {
        self.origin.remote_url().as_str()
    }

    pub fn orchestrator(&self) -> &ProxyOrchestrator {
        &self.orchestrator
    }

    pub fn is_blocked(&self) -> bool {
        self.origin.is_blocked()
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.origin.set_blocked(blocked);
    }

    /// Apply new max-ages and the block flag without rebuilding the repository.
    pub fn reconfigure(&self, cfg: &RepositoryConfig) {
        self.orchestrator
            .set_max_age(ContentClass::Content, minutes_to_max_age(cfg.content_max_age_mins));
        self.orchestrator
            .set_max_age(ContentClass::Metadata, minutes_to_max_age(cfg.metadata_max_age_mins));
        self.set_blocked(cfg.blocked);
    }
}

/// Repositories by name.
#[derive(Default)]
pub struct RepositoryRegistry {
    repositories: HashMap<String, Arc<ProxyRepository>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ProxyError> {
        let mut registry = Self::new();
        for repo in &cfg.repositories {
            registry.insert(ProxyRepository::from_config(repo)?);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, repository: ProxyRepository) -> Option<Arc<ProxyRepository>> {
        self.repositories
            .insert(repository.name().to_string(), Arc::new(repository))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProxyRepository>> {
        self.repositories.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.repositories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Apply runtime settings from `cfg` to the repositories that exist in
    /// both, returning their names. Added or removed repositories need a
    /// restart.
    pub fn reconfigure(&self, cfg: &AppConfig) -> Vec<String> {
        let mut applied = Vec::new();
        for repo_cfg in &cfg.repositories {
            match self.repositories.get(&repo_cfg.name) {
                Some(repo) => {
                    repo.reconfigure(repo_cfg);
                    applied.push(repo_cfg.name.clone());
                }
                None => warn!(
                    repository = %repo_cfg.name,
                    "New repository in configuration, restart to serve it"
                ),
            }
        }
        applied.sort_unstable();
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> RepositoryConfig {
        let mut cfg = RepositoryConfig::new("maven-central", "https://repo1.maven.org/maven2");
        cfg.content_max_age_mins = -1;
        cfg.metadata_max_age_mins = 30;
        cfg.metadata_suffixes = vec!["maven-metadata.xml".into()];
        cfg
    }

    #[test]
    fn test_from_config() {
        let repo = ProxyRepository::from_config(&config()).unwrap();
        let controllers = repo.orchestrator().cache_controllers();
        assert_eq!(controllers.content().max_age(), None);
        assert_eq!(controllers.metadata().max_age(), Some(Duration::from_secs(30 * 60)));
        assert!(repo.orchestrator().cooperation_config().is_active());
        assert_eq!(repo.remote_url(), "https://repo1.maven.org/maven2/");
        assert!(!repo.is_blocked());
    }

    #[test]
    fn test_reconfigure_updates_ttls_and_block() {
        let repo = ProxyRepository::from_config(&config()).unwrap();
        let mut updated = config();
        updated.content_max_age_mins = 5;
        updated.metadata_max_age_mins = -1;
        updated.blocked = true;
        repo.reconfigure(&updated);

        let controllers = repo.orchestrator().cache_controllers();
        assert_eq!(controllers.content().max_age(), Some(Duration::from_secs(300)));
        assert_eq!(controllers.metadata().max_age(), None);
        assert!(repo.is_blocked());
    }

    #[test]
    fn test_registry() {
        let mut cfg = AppConfig::default();
        cfg.repositories.push(config());
        cfg.repositories
            .push(RepositoryConfig::new("npm", "https://registry.npmjs.org"));

        let registry = RepositoryRegistry::from_config(&cfg).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["maven-central", "npm"]);
        assert!(registry.get("npm").is_some());
        assert!(registry.get("pypi").is_none());
    }

    #[test]
    fn test_registry_reconfigure_skips_unknown_repositories() {
        let mut cfg = AppConfig::default();
        cfg.repositories.push(config());
        let registry = RepositoryRegistry::from_config(&cfg).unwrap();

        cfg.repositories[0].content_max_age_mins = 10;
        cfg.repositories
            .push(RepositoryConfig::new("npm", "https://registry.npmjs.org"));
        assert_eq!(registry.reconfigure(&cfg), vec!["maven-central".to_string()]);

        let repo = registry.get("maven-central").unwrap();
        assert_eq!(
            repo.orchestrator().cache_controllers().content().max_age(),
            Some(Duration::from_secs(600))
        );
        assert!(registry.get("npm").is_none());
    }
}
