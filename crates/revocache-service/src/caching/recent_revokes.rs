use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::{Instant, MissedTickBehavior};

/// Tracks recently received revoke events and the start times of in-flight
/// fetches.
///
/// This exists to answer one question in O(1): "was this key revoked
/// at-or-after the moment a given fetch started?" — which is what lets the
/// cache detect a revoke racing with a fetch that was already in flight.
///
/// Memory stays bounded because a revoke record only matters as long as some
/// fetch that started before it is still running: the cleanup sweep discards
/// everything older than the earliest in-flight fetch.
pub struct RecentRevokesCache {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Latest revoke time per key.
    index: FxHashMap<Arc<str>, Instant>,
    /// Revoke records in arrival order, driving the cleanup sweep.
    queue: VecDeque<(Arc<str>, Instant)>,
    /// Start times of in-flight fetches, keyed by registration id.
    ongoing: FxHashMap<u64, Instant>,
    next_fetch_id: u64,
}

/// Keeps an in-flight fetch registered until dropped.
///
/// Hold this guard across the fetch future so the registration ends exactly
/// when the fetch does, whether it completed or was dropped mid-flight.
pub struct OutgoingFetchGuard {
    cache: Arc<RecentRevokesCache>,
    id: u64,
}

impl Drop for OutgoingFetchGuard {
    fn drop(&mut self) {
        self.cache.inner.lock().unwrap().ongoing.remove(&self.id);
    }
}

impl RecentRevokesCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Spawns the periodic cleanup sweep on the current tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the cache itself
    /// is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) {
        let this: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match this.upgrade() {
                    Some(cache) => cache.cleanup(),
                    None => break,
                }
            }
        });
    }

    /// Records that a fetch started at `start`.
    ///
    /// The registration lasts until the returned guard is dropped.
    pub fn register_outgoing_request(self: &Arc<Self>, start: Instant) -> OutgoingFetchGuard {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_fetch_id;
            inner.next_fetch_id += 1;
            inner.ongoing.insert(id, start);
            id
        };
        OutgoingFetchGuard {
            cache: Arc::clone(self),
            id,
        }
    }

    /// Records that `key` was revoked at `time`.
    ///
    /// Only the latest revoke time per key is kept: a registration that is
    /// not newer than the recorded one is ignored.
    pub fn register_revoke_key(&self, key: &str, time: Instant) {
        let mut inner = self.inner.lock().unwrap();
        let key: Arc<str> = match inner.index.get_key_value(key) {
            Some((existing, recorded)) => {
                if *recorded >= time {
                    return;
                }
                Arc::clone(existing)
            }
            None => Arc::from(key),
        };
        inner.index.insert(Arc::clone(&key), time);
        inner.queue.push_back((key, time));
    }

    /// Returns the recorded revoke time for `key` iff it is at-or-after
    /// `compare`.
    pub fn try_get_recently_revoked_time(&self, key: &str, compare: Instant) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner.index.get(key).copied().filter(|&time| time >= compare)
    }

    /// Discards revoke records that no in-flight fetch can race with anymore.
    ///
    /// Records strictly older than the earliest in-flight fetch start are
    /// dropped; with no fetch in flight, everything older than "now" goes.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let barrier = inner.ongoing.values().copied().min().unwrap_or(now);

        let mut dropped = 0usize;
        loop {
            let Some((key, time)) = inner.queue.front() else {
                break;
            };
            if *time >= barrier {
                break;
            }
            let key = Arc::clone(key);
            let time = *time;
            inner.queue.pop_front();
            // A queue record is stale if the key was revoked again later;
            // only the newest record owns the index slot.
            if inner.index.get(&key) == Some(&time) {
                inner.index.remove(&key);
            }
            dropped += 1;
        }

        if dropped > 0 {
            tracing::trace!(dropped, "cleaned up recent revoke records");
        }
    }

    /// Number of currently registered in-flight fetches.
    pub fn ongoing_fetch_count(&self) -> usize {
        self.inner.lock().unwrap().ongoing.len()
    }

    /// Number of revoke records awaiting cleanup.
    pub fn revoke_queue_count(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Number of distinct keys with a recorded revoke time.
    pub fn revoke_index_count(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }
}
