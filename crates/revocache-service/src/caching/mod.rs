//! # Memoizing cache with revocation support
//!
//! This module contains the whole caching subsystem: the concurrent
//! key/value store, the call-site memoizer wrapping a remote data source,
//! and the bookkeeping that makes cache invalidation safe against races with
//! in-flight fetches.
//!
//! ## Components
//!
//! - [`AsyncCache`] is the core store: a concurrent map from [`CacheKey`] to
//!   a cached value with its lifetime bookkeeping, plus a reverse index from
//!   revoke key to the cache keys tagged with it. Concurrent misses for the
//!   same key are coalesced onto a single upstream fetch; reads past an
//!   entry's soft deadline trigger a deduplicated background refresh while
//!   the old value keeps being served.
//! - [`AsyncMemoizer`] sits at the call site: it derives a [`CacheKey`] from
//!   a method's identity and the canonical serialization of its
//!   key-participating arguments, dispatches through [`AsyncCache`], and
//!   transparently strips and re-applies the revocation metadata of
//!   [`Revocable`] results.
//! - [`RecentRevokesCache`] remembers recently received revoke events and
//!   the start times of in-flight fetches. It answers the one question the
//!   race rule needs: "was this key revoked at-or-after that fetch started?"
//! - [`spawn_revoke_listener`] plugs an inbound stream of revoke keys into a
//!   cache, one consumer loop per cache.
//!
//! ## Entry lifetime
//!
//! Every stored entry carries two absolute deadlines, both fixed at store
//! time and never moved by reads (unless the policy explicitly opts into
//! [`ExpirationBehavior::ExtendOnRead`]):
//!
//! - past `next_refresh_at`, a read still returns the cached value but kicks
//!   off a background refresh;
//! - past `expires_at`, the entry is treated as gone and the next read
//!   fetches synchronously.
//!
//! A failed background refresh is swallowed: the stale value keeps being
//! served until it expires, and further refresh attempts wait out the
//! policy's `failed_refresh_delay`.
//!
//! ## The race rule
//!
//! A revoke for key `k` arriving while a fetch is in flight makes that
//! fetch's result unsafe to cache: the fetch may have read the data before
//! the change that triggered the revoke. At store time the cache therefore
//! asks the [`RecentRevokesCache`] whether any of the result's revoke keys
//! were revoked at-or-after the fetch started, and if so serves the result
//! to the waiting callers without storing it.
//!
//! ## Metrics
//!
//! All components emit counters through the injected
//! [`MetricsSink`](crate::metrics::MetricsSink):
//!
//! - `cache.access`, `cache.hit`, `cache.miss`: read traffic.
//! - `items.added`, `items.refreshed`, `items.refresh_failed`,
//!   `items.expired`, `items.removed`: entry lifecycle.
//! - `revokes.succeeded`, `revokes.noop`, `revokes.discarded`: revoke
//!   processing, including results dropped by the race rule.
//! - `memoizer.bypass`: calls that skipped the cache due to suppression or a
//!   disabled policy.

mod async_cache;
mod cache_error;
mod cache_key;
mod entry;
mod memoizer;
mod metadata;
mod policy;
mod recent_revokes;
mod revokes;

pub use async_cache::{AsyncCache, Fetched};
pub use cache_error::{CacheContents, CacheError};
pub use cache_key::{CacheKey, CacheKeyBuilder};
pub use memoizer::{
    AsyncMemoizer, CacheSuppression, CallContext, CallResult, DataSource, Revocable,
};
pub use metadata::{
    MetadataProvider, MethodDescriptor, MethodMetadata, ParameterDescriptor, ReturnShape,
};
pub use policy::{CachingPolicy, ExpirationBehavior};
pub use recent_revokes::{OutgoingFetchGuard, RecentRevokesCache};
pub use revokes::{RevokeListenerHandle, RevokeSender, spawn_revoke_listener};
