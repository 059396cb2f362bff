//! Wires the caching components together according to a [`Config`].
//!
//! Embedders construct one [`SharedServices`] per upstream data source: it
//! owns the memoizer, the revoke plumbing, and the recent-revokes
//! bookkeeping, all sharing one metrics sink.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::{
    AsyncCache, AsyncMemoizer, DataSource, RecentRevokesCache, RevokeListenerHandle, RevokeSender,
    spawn_revoke_listener,
};
use crate::config::Config;
use crate::metrics::{NoopSink, SharedMetricsSink, StatsdMetricsSink};

/// The assembled caching subsystem for one upstream data source.
pub struct SharedServices {
    pub config: Config,
    pub memoizer: AsyncMemoizer,
    pub recent_revokes: Arc<RecentRevokesCache>,
    /// Producer handle for inbound revoke keys; hand clones to every
    /// transport that can announce data changes.
    pub revoke_sender: RevokeSender,
    pub revoke_listener: RevokeListenerHandle,
}

impl SharedServices {
    /// Wires cache, memoizer and revoke plumbing according to `config`.
    ///
    /// Must run inside a tokio runtime: the revoke consumer loop and the
    /// recent-revokes cleanup sweep are spawned here.
    pub fn new(config: Config, source: Arc<dyn DataSource>) -> Result<Self> {
        let metrics: SharedMetricsSink = match &config.metrics.statsd {
            Some(host) => Arc::new(
                StatsdMetricsSink::new(
                    &config.metrics.prefix,
                    host.as_str(),
                    config.metrics.custom_tags.clone(),
                )
                .context("failed to set up statsd metrics sink")?,
            ),
            None => Arc::new(NoopSink),
        };

        let recent_revokes = RecentRevokesCache::new();
        recent_revokes.spawn_cleanup(config.revokes.cleanup_interval);

        let cache = AsyncCache::new(
            "memoized_calls",
            Arc::clone(&recent_revokes),
            Arc::clone(&metrics),
        );
        let (revoke_sender, revoke_listener) = spawn_revoke_listener(cache.clone());
        let memoizer = AsyncMemoizer::new(source, cache, metrics);

        Ok(Self {
            config,
            memoizer,
            recent_revokes,
            revoke_sender,
            revoke_listener,
        })
    }
}
