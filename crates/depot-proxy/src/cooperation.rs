//! Request cooperation: at most one upstream fetch per key at a time.
//!
//! The first caller for a key becomes the leader of a round and runs the
//! fetch on a spawned task. Callers arriving while the round is open become
//! followers and wait for the leader's outcome, in bounded waits staggered
//! so that followers that joined together do not all re-check together.
//! Once the outcome is published the round is removed from the table and the
//! next caller starts a new one.
//!
//! Callers may pass a check that looks for a usable result without fetching.
//! A new leader runs it before fetching and followers run it each time a
//! bounded wait expires.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use depot_core::{ContentKey, ProxyError};
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tracing::{debug, trace};

/// Number of stagger slots a base gap is divided into.
pub const STAGGER_SLOTS: usize = 8;

/// Per-repository cooperation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooperationConfig {
    pub enabled: bool,
    /// Total time a follower may wait for a leader. Zero disables cooperation.
    pub major_timeout: Duration,
    /// Bound on a single wait before the follower re-checks.
    pub minor_timeout: Duration,
    /// Maximum callers (leader included) per key; 0 means unlimited.
    pub threads_per_key: usize,
}

impl Default for CooperationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            major_timeout: Duration::from_secs(60),
            minor_timeout: Duration::from_secs(30),
            threads_per_key: 100,
        }
    }
}

impl CooperationConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.major_timeout.is_zero()
    }

    fn wait_gap(&self) -> Duration {
        if self.minor_timeout.is_zero() {
            self.major_timeout
        } else {
            self.minor_timeout
        }
    }
}

type Outcome<T> = Option<Result<T, ProxyError>>;

/// One in-flight fetch shared by every caller cooperating on its key.
pub struct CooperatingFuture<T> {
    key: ContentKey,
    outcome: watch::Sender<Outcome<T>>,
    callers: AtomicUsize,
    stagger: AtomicUsize,
}

impl<T: Clone> CooperatingFuture<T> {
    fn new(key: ContentKey) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            key,
            outcome,
            callers: AtomicUsize::new(1),
            stagger: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// Callers currently cooperating on this round, leader included.
    pub fn callers(&self) -> usize {
        self.callers.load(Ordering::SeqCst)
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait before the next re-check: `gap` plus the next slot's share of it.
    ///
    /// Successive calls on one future take slots round-robin, so the result
    /// always lies in `[gap, 2 * gap)` and callers asking together wake
    /// `gap / STAGGER_SLOTS` apart.
    pub fn stagger_timeout(&self, gap: Duration) -> Duration {
        let slot = self.stagger.fetch_add(1, Ordering::SeqCst) % STAGGER_SLOTS;
        gap + gap * slot as u32 / STAGGER_SLOTS as u32
    }

    fn resolve(&self, outcome: Result<T, ProxyError>) {
        self.outcome.send_replace(Some(outcome));
    }

    /// Waits up to `limit` for the outcome. `None` means the wait timed out.
    async fn wait(&self, limit: Duration) -> Outcome<T> {
        let mut rx = self.outcome.subscribe();
        match timeout(limit, rx.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => outcome.clone(),
            Ok(Err(_)) => Some(Err(ProxyError::internal(format!(
                "Cooperation on {} ended without an outcome",
                self.key
            )))),
            Err(_) => None,
        }
    }
}

/// Decrements the caller count when a follower leaves, however it leaves.
struct FollowerGuard<T> {
    future: Arc<CooperatingFuture<T>>,
}

impl<T> Drop for FollowerGuard<T> {
    fn drop(&mut self) {
        self.future.callers.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Role<T> {
    Leader(Arc<CooperatingFuture<T>>),
    Follower(Arc<CooperatingFuture<T>>),
}

type Table<T> = DashMap<ContentKey, Arc<CooperatingFuture<T>>>;

/// Coalesces concurrent fetches of the same key.
pub struct Cooperation<T> {
    name: String,
    config: CooperationConfig,
    table: Arc<Table<T>>,
}

impl<T> Cooperation<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: CooperationConfig) -> Self {
        Self {
            name: name.into(),
            config,
            table: Arc::new(DashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CooperationConfig {
        &self.config
    }

    /// Runs `fetch` for `key`, or shares the outcome of a fetch already in
    /// flight for it.
    ///
    /// With cooperation inactive `fetch` is simply awaited.
    ///
    /// # Errors
    ///
    /// Returns whatever the round's fetch returned, shared by every caller of
    /// the round. Followers additionally fail with
    /// `ProxyError::CooperationTimeout` once they have waited `major_timeout`,
    /// and callers beyond `threads_per_key` fail with
    /// `ProxyError::CooperationLimit`.
    pub async fn cooperate<F, Fut>(&self, key: &ContentKey, fetch: F) -> Result<T, ProxyError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ProxyError>> + Send + 'static,
    {
        self.cooperate_checked(key, fetch, || std::future::ready(None))
            .await
    }

    /// Like [`cooperate`](Self::cooperate), with a `check` that can produce
    /// the result without fetching.
    ///
    /// A leader runs `check` before `fetch` and shares its value with the
    /// round when it yields one. A follower runs it whenever a bounded wait
    /// expires and returns its value instead of waiting further. `check` is
    /// not used while cooperation is inactive.
    pub async fn cooperate_checked<F, Fut, C, CFut>(
        &self,
        key: &ContentKey,
        fetch: F,
        check: C,
    ) -> Result<T, ProxyError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ProxyError>> + Send + 'static,
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Option<T>> + Send + 'static,
    {
        if !self.config.is_active() {
            return fetch().await;
        }
        match self.join(key)? {
            Role::Leader(future) => self.lead(future, fetch, check).await,
            Role::Follower(future) => self.follow(future, check).await,
        }
    }

    /// Callers currently cooperating on each key with an open round.
    pub fn thread_count_per_key(&self) -> HashMap<ContentKey, usize> {
        self.table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().callers()))
            .collect()
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    fn join(&self, key: &ContentKey) -> Result<Role<T>, ProxyError> {
        match self.table.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let future = entry.get();
                let limit = self.config.threads_per_key;
                if limit > 0 && future.callers() >= limit {
                    debug!(cooperation = %self.name, key = %key, limit, "Thread cooperation maxed");
                    return Err(ProxyError::cooperation_limit(key, limit));
                }
                future.callers.fetch_add(1, Ordering::SeqCst);
                Ok(Role::Follower(Arc::clone(future)))
            }
            Entry::Vacant(entry) => {
                let future = Arc::new(CooperatingFuture::new(key.clone()));
                entry.insert(Arc::clone(&future));
                Ok(Role::Leader(future))
            }
        }
    }

    async fn lead<F, Fut, C, CFut>(
        &self,
        future: Arc<CooperatingFuture<T>>,
        fetch: F,
        check: C,
    ) -> Result<T, ProxyError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ProxyError>> + Send + 'static,
        C: Fn() -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Option<T>> + Send + 'static,
    {
        trace!(cooperation = %self.name, key = %future.key(), "Leading fetch");
        let table = Arc::clone(&self.table);
        let round = Arc::clone(&future);
        let name = self.name.clone();

        // Runs detached so followers get an outcome even if our caller goes away.
        let task = tokio::spawn(async move {
            let key = round.key().clone();
            let work = async move {
                if let Some(value) = check().await {
                    debug!(cooperation = %name, key = %key, "Usable result found, skipping fetch");
                    return Ok(value);
                }
                fetch().await
            };
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProxyError::internal(format!(
                    "Fetch of {} panicked",
                    round.key()
                ))),
            };
            round.resolve(outcome.clone());
            round.callers.fetch_sub(1, Ordering::SeqCst);
            table.remove_if(round.key(), |_, current| Arc::ptr_eq(current, &round));
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ProxyError::internal(format!(
                "Fetch task for {} failed: {e}",
                future.key()
            ))),
        }
    }

    async fn follow<C, CFut>(&self, future: Arc<CooperatingFuture<T>>, check: C) -> Result<T, ProxyError>
    where
        C: Fn() -> CFut,
        CFut: Future<Output = Option<T>>,
    {
        let guard = FollowerGuard { future };
        let future = &guard.future;
        let joined = Instant::now();
        let major = self.config.major_timeout;
        let gap = self.config.wait_gap();
        let mut wait = future.stagger_timeout(gap).min(major);

        trace!(cooperation = %self.name, key = %future.key(), "Following fetch");
        loop {
            if let Some(outcome) = future.wait(wait).await {
                return outcome;
            }
            if let Some(value) = check().await {
                debug!(
                    cooperation = %self.name,
                    key = %future.key(),
                    "Usable result found while waiting on cooperating fetch"
                );
                return Ok(value);
            }
            let waited = joined.elapsed();
            if waited >= major {
                debug!(
                    cooperation = %self.name,
                    key = %future.key(),
                    waited = ?waited,
                    "Gave up waiting on cooperating fetch"
                );
                return Err(ProxyError::cooperation_timeout(future.key(), waited));
            }
            wait = future.stagger_timeout(gap).min(major - waited);
            debug!(
                cooperation = %self.name,
                key = %future.key(),
                waited = ?waited,
                next_wait = ?wait,
                "Still waiting on cooperating fetch"
            );
        }
    }
}
