use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use depot_proxy::CooperationConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Proxy repositories served under `/repository/{name}/`
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Repository validations
        let mut names = HashSet::new();
        for repo in &self.repositories {
            repo.validate()?;
            if !names.insert(repo.name.as_str()) {
                return Err(format!("duplicate repository name '{}'", repo.name));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8081
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A proxy repository in front of one remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub remote_url: String,
    /// Minutes before cached artifacts are revalidated; -1 means never.
    #[serde(default = "default_max_age_mins")]
    pub content_max_age_mins: i64,
    /// Minutes before cached metadata is revalidated; -1 means never.
    #[serde(default = "default_max_age_mins")]
    pub metadata_max_age_mins: i64,
    /// Path suffixes that identify metadata, e.g. `maven-metadata.xml`
    #[serde(default)]
    pub metadata_suffixes: Vec<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Start with the remote blocked; fetches fail without contacting it.
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub cooperation: CooperationSettings,
}

fn default_max_age_mins() -> i64 {
    1440
}
fn default_connect_timeout_secs() -> u64 {
    20
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, remote_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_url: remote_url.into(),
            content_max_age_mins: default_max_age_mins(),
            metadata_max_age_mins: default_max_age_mins(),
            metadata_suffixes: Vec::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            blocked: false,
            cooperation: CooperationSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("repositories[].name must not be empty".into());
        }
        if self.name.contains('/') {
            return Err(format!("repository name '{}' must not contain '/'", self.name));
        }
        let url = url::Url::parse(&self.remote_url)
            .map_err(|e| format!("repository '{}': invalid remote_url: {e}", self.name))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "repository '{}': remote_url must be http or https",
                self.name
            ));
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(format!("repository '{}': timeouts must be > 0", self.name));
        }
        if self.cooperation.enabled && self.cooperation.minor_timeout_secs == 0 {
            return Err(format!(
                "repository '{}': cooperation.minor_timeout_secs must be > 0",
                self.name
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooperationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 0 disables cooperation
    #[serde(default = "default_major_timeout_secs")]
    pub major_timeout_secs: u64,
    #[serde(default = "default_minor_timeout_secs")]
    pub minor_timeout_secs: u64,
    /// 0 means unlimited
    #[serde(default = "default_threads_per_key")]
    pub threads_per_key: usize,
}

fn default_true() -> bool {
    true
}
fn default_major_timeout_secs() -> u64 {
    60
}
fn default_minor_timeout_secs() -> u64 {
    30
}
fn default_threads_per_key() -> usize {
    100
}

impl Default for CooperationSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            major_timeout_secs: default_major_timeout_secs(),
            minor_timeout_secs: default_minor_timeout_secs(),
            threads_per_key: default_threads_per_key(),
        }
    }
}

impl CooperationSettings {
    pub fn to_cooperation_config(&self) -> CooperationConfig {
        CooperationConfig {
            enabled: self.enabled,
            major_timeout: Duration::from_secs(self.major_timeout_secs),
            minor_timeout: Duration::from_secs(self.minor_timeout_secs),
            threads_per_key: self.threads_per_key,
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "depot.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., DEPOT__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("DEPOT")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}
