use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use moka::ops::compute::Op;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::time::Instant;

use crate::metrics::SharedMetricsSink;
use crate::utils::on_drop;

use super::entry::{CacheEntry, RevokeKeySet};
use super::policy::{CachingPolicy, ExpirationBehavior};
use super::recent_revokes::RecentRevokesCache;
use super::{CacheContents, CacheKey};

/// A value fetched from the data source: the payload plus the revoke keys it
/// depends on.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub revoke_keys: Vec<String>,
}

impl<T> Fetched<T> {
    /// A payload that does not participate in revocation.
    pub fn plain(value: T) -> Self {
        Self {
            value,
            revoke_keys: Vec::new(),
        }
    }
}

/// The per-key in-flight fetch that concurrent miss-path callers await.
type SharedFetch<T> = Shared<BoxFuture<'static, CacheContents<T>>>;

/// An asynchronous memoizing key/value store with revocation support.
///
/// Concurrent misses for the same key are coalesced onto a single upstream
/// fetch. A read past an entry's soft deadline returns the old value
/// immediately and kicks off at most one background refresh. Entries are
/// removed when their hard TTL passes (lazily, on the next access) or when a
/// revoke notification targets one of their revoke keys.
///
/// Every fetch result is checked against the [`RecentRevokesCache`] before it
/// is stored: a result whose revoke keys were revoked while the fetch was in
/// flight is served to the waiting callers but never cached.
pub struct AsyncCache<T> {
    name: &'static str,

    /// The concurrent entry store.
    store: moka::future::Cache<CacheKey, CacheEntry<T>>,

    /// In-flight miss-path fetches, one per key.
    inflight: Arc<Mutex<FxHashMap<CacheKey, SharedFetch<T>>>>,

    /// Keys with a background refresh currently running.
    refreshes: Arc<Mutex<FxHashSet<CacheKey>>>,

    /// Earliest next refresh attempt per key, set after a failed refresh.
    refresh_backoff: Arc<Mutex<FxHashMap<CacheKey, Instant>>>,

    /// Reverse index from revoke key to tagged cache keys.
    index: Arc<Mutex<RevokeIndex>>,

    recent_revokes: Arc<RecentRevokesCache>,
    metrics: SharedMetricsSink,
}

impl<T> std::fmt::Debug for AsyncCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let refreshes = self
            .refreshes
            .try_lock()
            .map(|r| r.len())
            .unwrap_or_default();
        f.debug_struct("AsyncCache")
            .field("name", &self.name)
            .field("entries", &self.store.entry_count())
            .field("running refreshes", &refreshes)
            .finish()
    }
}

impl<T> Clone for AsyncCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        AsyncCache {
            name: self.name,
            store: self.store.clone(),
            inflight: Arc::clone(&self.inflight),
            refreshes: Arc::clone(&self.refreshes),
            refresh_backoff: Arc::clone(&self.refresh_backoff),
            index: Arc::clone(&self.index),
            recent_revokes: Arc::clone(&self.recent_revokes),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<T> AsyncCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        recent_revokes: Arc<RecentRevokesCache>,
        metrics: SharedMetricsSink,
    ) -> Self {
        let store = moka::future::Cache::builder().name(name).build();

        AsyncCache {
            name,
            store,
            inflight: Default::default(),
            refreshes: Default::default(),
            refresh_backoff: Default::default(),
            index: Default::default(),
            recent_revokes,
            metrics,
        }
    }

    /// Returns the cached value for `key`, fetching or refreshing it
    /// according to `policy`.
    ///
    /// Concurrent callers racing on a missing or expired key share a single
    /// fetch; if it fails, they all get the error and nothing is cached.
    /// Callers hitting a stale-but-live entry get the old value immediately
    /// while at most one background refresh runs.
    pub async fn get_or_add<F>(
        &self,
        key: &CacheKey,
        policy: CachingPolicy,
        fetch: F,
    ) -> CacheContents<T>
    where
        F: FnOnce() -> BoxFuture<'static, CacheContents<Fetched<T>>> + Send + 'static,
    {
        self.metrics.increment("cache.access");
        let now = Instant::now();

        if let Some(entry) = self.store.get(key).await {
            if entry.is_expired(now) {
                // Lazy expiry: leave the entry in place (the successful
                // fetch below replaces it) and take the miss path.
                self.metrics.increment("items.expired");
                tracing::trace!(cache = self.name, key = %key, "entry expired");
            } else {
                self.metrics.increment("cache.hit");
                if policy.expiration_behavior == ExpirationBehavior::ExtendOnRead {
                    self.extend_expiration(key, &entry, now, &policy).await;
                }
                if entry.needs_refresh(now) {
                    self.maybe_spawn_refresh(key.clone(), policy, fetch);
                }
                return Ok(entry.value.clone());
            }
        }

        self.metrics.increment("cache.miss");
        self.fetch_shared(key.clone(), policy, fetch).await
    }

    /// Invalidates every entry tagged with `revoke_key`.
    ///
    /// The revoke is registered with the recent-revokes window *before* the
    /// index is consulted, so a fetch completing concurrently observes it and
    /// discards its result. Revoking a key nobody cached is a no-op.
    pub async fn revoke(&self, revoke_key: &str) {
        self.recent_revokes
            .register_revoke_key(revoke_key, Instant::now());

        let keys = self.index.lock().unwrap().cache_keys_for(revoke_key);
        if keys.is_empty() {
            self.metrics.increment("revokes.noop");
            tracing::trace!(cache = self.name, revoke_key, "revoke matched no entries");
            return;
        }

        for key in keys {
            self.index.lock().unwrap().remove(&key);
            self.store.invalidate(&key).await;
            self.refresh_backoff.lock().unwrap().remove(&key);
            self.metrics.increment("items.removed");
            tracing::debug!(cache = self.name, key = %key, revoke_key, "revoked cache entry");
        }
        self.metrics.increment("revokes.succeeded");
    }

    /// Number of live cache keys.
    pub fn cache_key_count(&self) -> usize {
        self.index.lock().unwrap().by_cache_key.len()
    }

    /// Number of distinct revoke keys in the reverse index.
    pub fn revoke_key_count(&self) -> usize {
        self.index.lock().unwrap().by_revoke_key.len()
    }

    /// Joins the per-key in-flight fetch, creating it if this caller is
    /// first.
    async fn fetch_shared<F>(
        &self,
        key: CacheKey,
        policy: CachingPolicy,
        fetch: F,
    ) -> CacheContents<T>
    where
        F: FnOnce() -> BoxFuture<'static, CacheContents<Fetched<T>>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.entry(key.clone()) {
                Entry::Occupied(occupied) => occupied.get().clone(),
                Entry::Vacant(slot) => {
                    let shared = self
                        .clone()
                        .fetch_and_store(key, policy, fetch)
                        .boxed()
                        .shared();
                    slot.insert(shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    /// The body of the shared in-flight fetch: fetch, race-check, store.
    async fn fetch_and_store<F>(
        self,
        key: CacheKey,
        policy: CachingPolicy,
        fetch: F,
    ) -> CacheContents<T>
    where
        F: FnOnce() -> BoxFuture<'static, CacheContents<Fetched<T>>> + Send + 'static,
    {
        // Deregistration must happen on every exit path, including the whole
        // shared future being dropped because all callers went away.
        let _inflight_guard = {
            let inflight = Arc::clone(&self.inflight);
            let key = key.clone();
            on_drop(move || {
                inflight.lock().unwrap().remove(&key);
            })
        };

        let start = Instant::now();
        let _fetch_guard = self.recent_revokes.register_outgoing_request(start);

        let fetched = fetch().await?;

        if self.store_fetch_result(&key, &fetched, start, &policy).await {
            self.metrics.increment("items.added");
        }
        Ok(fetched.value)
    }

    /// Stores a completed fetch unless a revoke raced with it.
    ///
    /// Returns whether the result was stored. A result whose revoke keys were
    /// revoked at-or-after `fetch_start` is discarded: the callers already
    /// waiting on it still receive the value, but the cache must not serve it
    /// to anyone else.
    async fn store_fetch_result(
        &self,
        key: &CacheKey,
        fetched: &Fetched<T>,
        fetch_start: Instant,
        policy: &CachingPolicy,
    ) -> bool {
        let revoke_keys: RevokeKeySet = Arc::new(
            fetched
                .revoke_keys
                .iter()
                .map(|k| Arc::from(k.as_str()))
                .collect(),
        );

        if self.raced_with_revoke(&revoke_keys, fetch_start) {
            self.metrics.increment("revokes.discarded");
            tracing::debug!(cache = self.name, key = %key, "discarding fetch result revoked during flight");
            return false;
        }

        let entry = CacheEntry::new(
            fetched.value.clone(),
            Arc::clone(&revoke_keys),
            fetch_start,
            policy,
        );
        let revision = entry.revision;

        self.index
            .lock()
            .unwrap()
            .update(key.clone(), Arc::clone(&revoke_keys));
        self.store.insert(key.clone(), entry).await;

        // A revoke processed between the check above and the insert saw
        // either no index record or no stored entry. Re-checking after the
        // insert guarantees that at least one side observes the other; both
        // undoing the store is harmless.
        if self.raced_with_revoke(&revoke_keys, fetch_start) {
            self.discard(key, revision, &revoke_keys).await;
            self.metrics.increment("revokes.discarded");
            tracing::debug!(cache = self.name, key = %key, "discarding fetch result revoked during store");
            return false;
        }
        true
    }

    fn raced_with_revoke(&self, revoke_keys: &RevokeKeySet, fetch_start: Instant) -> bool {
        revoke_keys.iter().any(|k| {
            self.recent_revokes
                .try_get_recently_revoked_time(k, fetch_start)
                .is_some()
        })
    }

    /// Removes a just-stored entry again, but only if it was not already
    /// replaced by a newer one.
    async fn discard(&self, key: &CacheKey, revision: u64, revoke_keys: &RevokeKeySet) {
        let _ = self
            .store
            .entry(key.clone())
            .and_compute_with(|current| {
                let op = match current {
                    Some(cur) if cur.value().revision == revision => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        self.index.lock().unwrap().remove_if(key, revoke_keys);
    }

    /// Pushes an entry's hard deadline forward after a successful read.
    ///
    /// Only the entry the caller actually read is extended; a concurrent
    /// replacement keeps its own deadlines.
    async fn extend_expiration(
        &self,
        key: &CacheKey,
        entry: &CacheEntry<T>,
        now: Instant,
        policy: &CachingPolicy,
    ) {
        let revision = entry.revision;
        let expires_at = now + policy.absolute_expiration;
        let _ = self
            .store
            .entry(key.clone())
            .and_compute_with(|current| {
                let op = match current {
                    Some(cur) if cur.value().revision == revision => {
                        let mut extended = cur.value().clone();
                        extended.expires_at = expires_at;
                        Op::Put(extended)
                    }
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }

    /// Starts a background refresh for `key` unless one is already running
    /// or a recent refresh failure is still backing off.
    fn maybe_spawn_refresh<F>(&self, key: CacheKey, policy: CachingPolicy, fetch: F)
    where
        F: FnOnce() -> BoxFuture<'static, CacheContents<Fetched<T>>> + Send + 'static,
    {
        {
            let backoff = self.refresh_backoff.lock().unwrap();
            if backoff.get(&key).is_some_and(|&until| Instant::now() < until) {
                return;
            }
        }

        let mut refreshes = self.refreshes.lock().unwrap();
        if !refreshes.insert(key.clone()) {
            return;
        }
        drop(refreshes);

        let done_token = {
            let key = key.clone();
            let refreshes = Arc::clone(&self.refreshes);
            on_drop(move || {
                refreshes.lock().unwrap().remove(&key);
            })
        };

        tracing::trace!(cache = self.name, key = %key, "spawning background refresh");

        let this = self.clone();
        tokio::spawn(async move {
            let _done_token = done_token;
            this.refresh(key, policy, fetch).await;
        });
    }

    async fn refresh<F>(&self, key: CacheKey, policy: CachingPolicy, fetch: F)
    where
        F: FnOnce() -> BoxFuture<'static, CacheContents<Fetched<T>>> + Send + 'static,
    {
        let start = Instant::now();
        let _fetch_guard = self.recent_revokes.register_outgoing_request(start);

        match fetch().await {
            Ok(fetched) => {
                if self.store_fetch_result(&key, &fetched, start, &policy).await {
                    self.refresh_backoff.lock().unwrap().remove(&key);
                    self.metrics.increment("items.refreshed");
                }
            }
            Err(err) => {
                // The stale value keeps being served until it expires; hold
                // off further attempts for the configured delay.
                tracing::error!(cache = self.name, key = %key, error = %err, "background refresh failed");
                self.refresh_backoff
                    .lock()
                    .unwrap()
                    .insert(key, Instant::now() + policy.failed_refresh_delay);
                self.metrics.increment("items.refresh_failed");
            }
        }
    }
}

/// Reverse index from revoke key to the cache keys currently tagged with it,
/// plus the forward map used to diff revoke-key sets on refresh.
///
/// Invariant: `by_revoke_key` maps `r -> k` iff `by_cache_key[k]` contains
/// `r`. Every mutation below maintains both maps in lockstep.
#[derive(Default)]
struct RevokeIndex {
    by_revoke_key: FxHashMap<Arc<str>, FxHashSet<CacheKey>>,
    by_cache_key: FxHashMap<CacheKey, RevokeKeySet>,
}

impl RevokeIndex {
    /// Points `key` at exactly `revoke_keys`, diffing against the previous
    /// set: mappings for dropped keys are removed, new ones added, unchanged
    /// ones left alone.
    fn update(&mut self, key: CacheKey, revoke_keys: RevokeKeySet) {
        let old = self
            .by_cache_key
            .insert(key.clone(), Arc::clone(&revoke_keys));

        if let Some(old) = &old {
            for dropped in old.iter().filter(|r| !revoke_keys.contains(*r)) {
                self.detach(dropped, &key);
            }
        }
        for added in revoke_keys.iter() {
            if old.as_ref().is_some_and(|o| o.contains(added)) {
                continue;
            }
            self.by_revoke_key
                .entry(Arc::clone(added))
                .or_default()
                .insert(key.clone());
        }
    }

    /// Removes `key` from the index, under all its revoke keys.
    fn remove(&mut self, key: &CacheKey) {
        if let Some(old) = self.by_cache_key.remove(key) {
            for r in old.iter() {
                self.detach(r, key);
            }
        }
    }

    /// Removes `key` only if it still points at exactly this revoke-key set
    /// (by identity); a concurrently stored successor stays indexed.
    fn remove_if(&mut self, key: &CacheKey, expected: &RevokeKeySet) {
        let matches = self
            .by_cache_key
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, expected));
        if matches {
            self.remove(key);
        }
    }

    fn detach(&mut self, revoke_key: &Arc<str>, key: &CacheKey) {
        if let Some(set) = self.by_revoke_key.get_mut(revoke_key) {
            set.remove(key);
            if set.is_empty() {
                self.by_revoke_key.remove(revoke_key);
            }
        }
    }

    fn cache_keys_for(&self, revoke_key: &str) -> Vec<CacheKey> {
        self.by_revoke_key
            .get(revoke_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
