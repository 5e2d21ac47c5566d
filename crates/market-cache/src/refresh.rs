use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use market_core::{FetchError, FetchResult, Source};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::ttl_cache::{CacheEntry, TtlCache};

/// Where a key stands in its refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefreshState {
    /// Nothing cached yet
    Missing,
    Fresh,
    /// Cached value is past its schedule and no refresh is running
    Due,
    Refreshing,
    /// The last refresh failed; the previous value is still being served
    StaleServed,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome<V> {
    Refreshed(CacheEntry<V>),
    Failed(FetchError),
}

/// What a read handed back.
#[derive(Debug, Clone)]
pub struct Served<V> {
    pub entry: Option<CacheEntry<V>>,
    pub state: RefreshState,
    /// Most recent refresh failure, when the value is stale or missing because of it
    pub error: Option<FetchError>,
}

impl<V> Served<V> {
    fn fresh(entry: CacheEntry<V>) -> Self {
        Self {
            entry: Some(entry),
            state: RefreshState::Fresh,
            error: None,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.entry.is_some() && self.state != RefreshState::Fresh
    }
}

type SharedRefresh<V> = Shared<BoxFuture<'static, RefreshOutcome<V>>>;

/// Single-flight refresh over a [`TtlCache`].
///
/// At most one refresh per key is in flight. Readers that find a stale value
/// get it back immediately while the refresh runs on its own task; readers
/// with nothing to serve wait on the shared refresh. A failed refresh never
/// overwrites the cached value.
pub struct RefreshController<K, V> {
    cache: Arc<TtlCache<K, V>>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<DashMap<K, (u64, SharedRefresh<V>)>>,
    failures: Arc<DashMap<K, (DateTime<Utc>, FetchError)>>,
    generation: Arc<AtomicU64>,
}

impl<K, V> Clone for RefreshController<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            clock: Arc::clone(&self.clock),
            in_flight: Arc::clone(&self.in_flight),
            failures: Arc::clone(&self.failures),
            generation: Arc::clone(&self.generation),
        }
    }
}

impl<K, V> RefreshController<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache: TtlCache<K, V>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(cache),
            clock,
            in_flight: Arc::new(DashMap::new()),
            failures: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cache(&self) -> &TtlCache<K, V> {
        &self.cache
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stale-while-revalidate read.
    ///
    /// `refresh` is called at most once, and only when this read starts a new
    /// refresh. It must not touch this controller.
    pub async fn read<F, Fut>(&self, key: &K, refresh: F) -> Served<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let now = self.clock.now();
        let cached = self.cache.get_allow_stale(key);

        match cached {
            Some(entry) if self.cache.is_fresh(&entry, now) => Served::fresh(entry),
            Some(stale) => {
                let error = self.failure_since(key, stale.fetched_at);
                let _ = self.begin(key, now, refresh);
                tracing::debug!("Serving stale {} while it refreshes", key);
                Served {
                    state: if error.is_some() {
                        RefreshState::StaleServed
                    } else {
                        RefreshState::Refreshing
                    },
                    entry: Some(stale),
                    error,
                }
            }
            None => {
                let (shared, _) = self.begin(key, now, refresh);
                self.settle(key, None, shared.await)
            }
        }
    }

    /// Read that waits for a due refresh instead of serving stale right away.
    /// Falls back to the stale value when the refresh fails.
    pub async fn read_through<F, Fut>(&self, key: &K, refresh: F) -> Served<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let now = self.clock.now();
        let cached = self.cache.get_allow_stale(key);

        if let Some(entry) = &cached {
            if self.cache.is_fresh(entry, now) {
                return Served::fresh(entry.clone());
            }
        }

        let (shared, _) = self.begin(key, now, refresh);
        self.settle(key, cached, shared.await)
    }

    /// Start (or join) a refresh regardless of freshness and wait for it.
    pub async fn refresh_now<F, Fut>(&self, key: &K, refresh: F) -> RefreshOutcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let now = self.clock.now();
        let (shared, _) = self.begin(key, now, refresh);
        shared.await
    }

    /// Wait for the refresh in flight for `key`, if any.
    pub async fn join(&self, key: &K) -> Option<RefreshOutcome<V>> {
        let shared = self.in_flight.get(key).map(|r| r.value().1.clone());
        match shared {
            Some(shared) => Some(shared.await),
            None => None,
        }
    }

    /// Wait for every refresh currently in flight. Returns how many there were.
    pub async fn join_all(&self) -> usize {
        let pending: Vec<SharedRefresh<V>> =
            self.in_flight.iter().map(|r| r.value().1.clone()).collect();
        let count = pending.len();
        futures_util::future::join_all(pending).await;
        count
    }

    pub fn is_refreshing(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn last_failure(&self, key: &K) -> Option<FetchError> {
        self.failures.get(key).map(|f| f.value().1.clone())
    }

    pub fn state_of(&self, key: &K) -> RefreshState {
        if self.in_flight.contains_key(key) {
            return RefreshState::Refreshing;
        }

        match self.cache.get_allow_stale(key) {
            None => RefreshState::Missing,
            Some(entry) if self.cache.is_fresh(&entry, self.clock.now()) => RefreshState::Fresh,
            Some(entry) => {
                if self.failure_since(key, entry.fetched_at).is_some() {
                    RefreshState::StaleServed
                } else {
                    RefreshState::Due
                }
            }
        }
    }

    /// Every key the controller knows about, cached or in flight.
    pub fn states(&self) -> Vec<(K, RefreshState)> {
        let mut keys = self.cache.keys();
        for r in self.in_flight.iter() {
            if !keys.contains(r.key()) {
                keys.push(r.key().clone());
            }
        }
        keys.into_iter()
            .map(|k| {
                let state = self.state_of(&k);
                (k, state)
            })
            .collect()
    }

    /// Drop old entries and the failure records that went with them.
    pub fn sweep(&self, retention: chrono::Duration) -> usize {
        let now = self.clock.now();
        let removed = self.cache.sweep(now, retention);
        self.failures.retain(|_, (at, _)| now - *at < retention);
        if removed > 0 {
            tracing::debug!("Swept {} expired entries", removed);
        }
        removed
    }

    fn failure_since(&self, key: &K, since: DateTime<Utc>) -> Option<FetchError> {
        self.failures
            .get(key)
            .filter(|f| f.value().0 >= since)
            .map(|f| f.value().1.clone())
    }

    fn settle(
        &self,
        key: &K,
        cached: Option<CacheEntry<V>>,
        outcome: RefreshOutcome<V>,
    ) -> Served<V> {
        match outcome {
            RefreshOutcome::Refreshed(entry) => Served::fresh(entry),
            RefreshOutcome::Failed(error) => {
                match cached.or_else(|| self.cache.get_allow_stale(key)) {
                    Some(stale) => {
                        tracing::warn!(
                            "Refresh of {} failed, serving value from {}: {}",
                            key,
                            stale.fetched_at,
                            error
                        );
                        Served {
                            entry: Some(stale),
                            state: RefreshState::StaleServed,
                            error: Some(error),
                        }
                    }
                    None => Served {
                        entry: None,
                        state: RefreshState::Missing,
                        error: Some(error),
                    },
                }
            }
        }
    }

    /// Join the in-flight refresh for `key` or start one. Returns true when this call started it.
    fn begin<F, Fut>(&self, key: &K, started_at: DateTime<Utc>, refresh: F) -> (SharedRefresh<V>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => (occupied.get().1.clone(), false),
            Entry::Vacant(vacant) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let work = refresh();

                let cache = Arc::clone(&self.cache);
                let in_flight = Arc::clone(&self.in_flight);
                let failures = Arc::clone(&self.failures);
                let task_key = key.clone();

                let handle = tokio::spawn(async move {
                    let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                        Ok(result) => Self::apply(&cache, &failures, &task_key, started_at, result),
                        Err(_) => {
                            tracing::error!("Refresh of {} panicked", task_key);
                            let error = FetchError::provider_error(Source::Fallback, "refresh panicked");
                            failures.insert(task_key.clone(), (started_at, error.clone()));
                            RefreshOutcome::Failed(error)
                        }
                    };
                    in_flight.remove_if(&task_key, |_, (g, _)| *g == generation);
                    outcome
                });

                let shared = async move {
                    handle.await.unwrap_or_else(|e| {
                        RefreshOutcome::Failed(FetchError::provider_error(
                            Source::Fallback,
                            format!("refresh task aborted: {}", e),
                        ))
                    })
                }
                .boxed()
                .shared();

                vacant.insert((generation, shared.clone()));
                (shared, true)
            }
        }
    }

    fn apply(
        cache: &TtlCache<K, V>,
        failures: &DashMap<K, (DateTime<Utc>, FetchError)>,
        key: &K,
        started_at: DateTime<Utc>,
        result: FetchResult<V>,
    ) -> RefreshOutcome<V> {
        let source = result.source;
        // Never stamp a value newer than the refresh that produced it
        let fetched_at = result
            .observed_at
            .map_or(started_at, |at| at.min(started_at));
        match result.outcome {
            Ok(value) if source.is_live() => {
                if !cache.put(key.clone(), value, source, fetched_at) {
                    tracing::debug!("Discarded refresh of {}: a newer value landed first", key);
                }
                failures.remove_if(key, |_, (at, _)| *at <= started_at);
                match cache.get_allow_stale(key) {
                    Some(entry) => RefreshOutcome::Refreshed(entry),
                    None => RefreshOutcome::Failed(FetchError::provider_error(
                        source,
                        "value evicted before it could be read",
                    )),
                }
            }
            Ok(_) => {
                let error = FetchError::AllProvidersExhausted {
                    query: key.to_string(),
                    attempts: Vec::new(),
                };
                failures.insert(key.clone(), (started_at, error.clone()));
                RefreshOutcome::Failed(error)
            }
            Err(error) => {
                failures.insert(key.clone(), (started_at, error.clone()));
                RefreshOutcome::Failed(error)
            }
        }
    }
}
