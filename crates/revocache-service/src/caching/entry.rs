use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashSet;
use tokio::time::Instant;

use super::policy::CachingPolicy;

/// The set of revoke keys a cached value depends on.
pub(super) type RevokeKeySet = Arc<FxHashSet<Arc<str>>>;

static NEXT_REVISION: AtomicU64 = AtomicU64::new(0);

/// A value stored in the cache, together with its lifetime bookkeeping.
#[derive(Debug, Clone)]
pub(super) struct CacheEntry<T> {
    /// The cached payload.
    pub value: T,
    /// Hard deadline: the entry counts as gone once this passes.
    pub expires_at: Instant,
    /// Soft deadline: a read past it triggers a background refresh.
    pub next_refresh_at: Instant,
    /// Revoke keys the payload depends on.
    pub revoke_keys: RevokeKeySet,
    /// When the fetch that produced this value started; compared against
    /// revoke times to detect a revoke racing with the fetch.
    pub fetch_start: Instant,
    /// Distinguishes entries stored under the same key, so that delayed
    /// bookkeeping (discards, read-extension) never touches a successor.
    pub revision: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, revoke_keys: RevokeKeySet, fetch_start: Instant, policy: &CachingPolicy) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now + policy.absolute_expiration,
            next_refresh_at: now + policy.refresh_time,
            revoke_keys,
            fetch_start,
            revision: NEXT_REVISION.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn needs_refresh(&self, now: Instant) -> bool {
        now >= self.next_refresh_at
    }
}
