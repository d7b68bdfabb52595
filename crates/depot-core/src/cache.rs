//! Staleness policy for proxied content.
//!
//! A [`CacheController`] is plain data (a max-age and an invalidation token)
//! held behind an `ArcSwap`, so a policy can be reconfigured at runtime
//! without blocking or disturbing evaluations already in progress.
//! [`CacheControllerHolder`] keeps one controller per [`ContentClass`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use time::OffsetDateTime;
use tracing::debug;

use crate::time::{elapsed_between, now_utc};

/// Upstream validator captured with fetched content, used for conditional requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
    pub etag: Option<String>,
    pub last_modified: Option<OffsetDateTime>,
}

impl Validator {
    pub fn new(etag: Option<String>, last_modified: Option<OffsetDateTime>) -> Self {
        Self {
            etag,
            last_modified,
        }
    }

    /// `None` when neither an ETag nor a Last-Modified date is known.
    pub fn non_empty(self) -> Option<Self> {
        if self.etag.is_none() && self.last_modified.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

/// When content was obtained from the origin and when it was last confirmed fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    fetched_at: OffsetDateTime,
    last_checked_at: OffsetDateTime,
    validator: Option<Validator>,
    cache_token: Option<String>,
}

impl CacheInfo {
    /// Info for content fetched at `at`; fetch and check times are the same.
    pub fn new(at: OffsetDateTime, validator: Option<Validator>, cache_token: Option<String>) -> Self {
        Self {
            fetched_at: at,
            last_checked_at: at,
            validator,
            cache_token,
        }
    }

    pub fn fetched_at(&self) -> OffsetDateTime {
        self.fetched_at
    }

    pub fn last_checked_at(&self) -> OffsetDateTime {
        self.last_checked_at
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.validator.as_ref()
    }

    pub fn cache_token(&self) -> Option<&str> {
        self.cache_token.as_deref()
    }

    /// Copy of this info re-confirmed at `now`; bytes and validator are unchanged.
    pub fn verified(&self, now: OffsetDateTime, cache_token: Option<String>) -> Self {
        Self {
            fetched_at: self.fetched_at,
            last_checked_at: now,
            validator: self.validator.clone(),
            cache_token,
        }
    }
}

/// Classes of content that may carry distinct staleness policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    Content,
    Metadata,
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content => write!(f, "content"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachePolicy {
    /// `None` means content never goes stale by age.
    max_age: Option<Duration>,
    cache_token: Option<String>,
}

/// Decides whether cached content must be revalidated with the origin.
#[derive(Debug)]
pub struct CacheController {
    policy: ArcSwap<CachePolicy>,
}

impl CacheController {
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            policy: ArcSwap::from_pointee(CachePolicy {
                max_age,
                cache_token: None,
            }),
        }
    }

    /// Build from a max-age in minutes; negative values mean "never stale".
    pub fn from_minutes(minutes: i64) -> Self {
        Self::new(minutes_to_max_age(minutes))
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.policy.load().max_age
    }

    pub fn cache_token(&self) -> Option<String> {
        self.policy.load().cache_token.clone()
    }

    /// Replace the max-age; the cache token is preserved.
    pub fn set_max_age(&self, max_age: Option<Duration>) {
        self.policy.rcu(|current| CachePolicy {
            max_age,
            cache_token: current.cache_token.clone(),
        });
    }

    /// Rotate the cache token so every existing entry counts as stale.
    pub fn invalidate(&self) {
        let token = uuid::Uuid::new_v4().to_string();
        debug!(cache_token = %token, "Rotating cache token");
        self.policy.rcu(|current| CachePolicy {
            max_age: current.max_age,
            cache_token: Some(token.clone()),
        });
    }

    /// Fresh `CacheInfo` stamped now with the current cache token.
    pub fn current(&self, validator: Option<Validator>) -> CacheInfo {
        CacheInfo::new(now_utc(), validator, self.cache_token())
    }

    pub fn is_stale(&self, info: Option<&CacheInfo>) -> bool {
        self.is_stale_at(info, now_utc())
    }

    /// Staleness as of `now`. Pure with respect to `info`.
    pub fn is_stale_at(&self, info: Option<&CacheInfo>, now: OffsetDateTime) -> bool {
        let Some(info) = info else {
            return true;
        };
        let policy: Arc<CachePolicy> = self.policy.load_full();
        if let Some(token) = &policy.cache_token {
            if info.cache_token() != Some(token.as_str()) {
                return true;
            }
        }
        match policy.max_age {
            None => false,
            Some(ttl) => {
                // A check time in the future is treated as just checked.
                now >= info.last_checked_at && elapsed_between(info.last_checked_at, now) >= ttl
            }
        }
    }
}

pub fn minutes_to_max_age(minutes: i64) -> Option<Duration> {
    u64::try_from(minutes)
        .ok()
        .map(|m| Duration::from_secs(m.saturating_mul(60)))
}

/// One controller per content class.
#[derive(Debug)]
pub struct CacheControllerHolder {
    content: CacheController,
    metadata: CacheController,
}

impl CacheControllerHolder {
    pub fn new(content: CacheController, metadata: CacheController) -> Self {
        Self { content, metadata }
    }

    /// Both classes share the same max-age.
    pub fn uniform(max_age: Option<Duration>) -> Self {
        Self::new(CacheController::new(max_age), CacheController::new(max_age))
    }

    pub fn get(&self, class: ContentClass) -> &CacheController {
        match class {
            ContentClass::Content => &self.content,
            ContentClass::Metadata => &self.metadata,
        }
    }

    pub fn content(&self) -> &CacheController {
        &self.content
    }

    pub fn metadata(&self) -> &CacheController {
        &self.metadata
    }

    pub fn invalidate_caches(&self) {
        self.content.invalidate();
        self.metadata.invalidate();
    }
}
