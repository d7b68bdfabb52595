//! Content keys: the unit of caching and request coalescing.

use std::fmt;
use std::sync::Arc;

use crate::error::{ProxyError, Result};

/// Identifies a cacheable unit: repository name plus normalized path.
///
/// Keys are cheap to clone (shared string storage) and are used both as the
/// cache lookup key and as the coalescing key for cooperating fetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey {
    repository: Arc<str>,
    path: Arc<str>,
}

impl ContentKey {
    /// Build a key, normalizing the path.
    ///
    /// Leading and duplicate slashes and `.` segments are dropped; a trailing
    /// slash is kept.
    /// Paths that escape the repository root with `..` are rejected.
    pub fn new(repository: impl AsRef<str>, path: impl AsRef<str>) -> Result<Self> {
        let repository = repository.as_ref().trim();
        if repository.is_empty() {
            return Err(ProxyError::invalid_path("repository name must not be empty"));
        }
        let path = normalize_path(path.as_ref())?;
        Ok(Self {
            repository: Arc::from(repository),
            path: Arc::from(path.as_str()),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Normalized path without a leading slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.path.rsplit('/').next().filter(|s| !s.is_empty())
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.repository, self.path)
    }
}

fn normalize_path(raw: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(ProxyError::invalid_path(raw)),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(ProxyError::invalid_path(raw));
    }
    let mut path = segments.join("/");
    if raw.ends_with('/') {
        path.push('/');
    }
    Ok(path)
}
