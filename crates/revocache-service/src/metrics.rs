//! The metrics capability handed to the caching components.
//!
//! Components receive an [`Arc<dyn MetricsSink>`](MetricsSink) at
//! construction and emit named counters through it; there is no process-wide
//! client to reach for. Production deployments use [`StatsdMetricsSink`],
//! everything else defaults to [`NoopSink`].

use std::collections::BTreeMap;
use std::fmt;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use cadence::prelude::*;
use cadence::{StatsdClient, UdpMetricSink};

/// A sink for the counters emitted on cache lifecycle events.
pub trait MetricsSink: Send + Sync {
    /// Increments the named counter by one.
    fn increment(&self, name: &str);
}

/// Shared handle to a metrics sink.
pub type SharedMetricsSink = Arc<dyn MetricsSink>;

/// A sink that drops every metric.
#[derive(Debug, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn increment(&self, _name: &str) {}
}

/// Returns a sink that drops every metric.
pub fn noop_sink() -> SharedMetricsSink {
    Arc::new(NoopSink)
}

/// Reports counters to a statsd instance over UDP.
pub struct StatsdMetricsSink {
    statsd_client: StatsdClient,

    /// A collection of tags and values that will be sent with every metric.
    tags: BTreeMap<String, String>,
}

impl StatsdMetricsSink {
    /// Creates a sink reporting to statsd at `host`, prefixing every counter
    /// with `prefix` and attaching `tags` to every metric.
    pub fn new<A: ToSocketAddrs>(
        prefix: &str,
        host: A,
        tags: BTreeMap<String, String>,
    ) -> anyhow::Result<Self> {
        let addrs: Vec<_> = host.to_socket_addrs()?.collect();
        if !addrs.is_empty() {
            tracing::info!("Reporting metrics to statsd at {}", addrs[0]);
        }
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        let sink = UdpMetricSink::from(&addrs[..], socket)?;

        Ok(Self {
            statsd_client: StatsdClient::from_sink(prefix, sink),
            tags,
        })
    }
}

impl MetricsSink for StatsdMetricsSink {
    fn increment(&self, name: &str) {
        let mut metric = self.statsd_client.count_with_tags(name, 1);
        for (tag, value) in self.tags.iter() {
            metric = metric.with_tag(tag, value);
        }
        metric.send();
    }
}

impl fmt::Debug for StatsdMetricsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdMetricsSink")
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
