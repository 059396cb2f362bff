use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::SharedMetricsSink;

use super::async_cache::{AsyncCache, Fetched};
use super::metadata::{MetadataProvider, MethodDescriptor, ReturnShape};
use super::policy::CachingPolicy;
use super::{CacheContents, CacheError, CacheKey};

/// A payload paired with the revoke keys it depends on.
///
/// Servers return this wrapper for methods whose results must be invalidated
/// when underlying data changes; the memoizer strips it before handing the
/// payload to the caller and re-applies the keys when storing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revocable<T> {
    pub value: T,
    pub revoke_keys: Vec<String>,
}

/// The result of one remote call, as seen by the memoizer.
#[derive(Debug, Clone)]
pub enum CallResult {
    Plain(Value),
    Revocable(Revocable<Value>),
}

impl CallResult {
    fn is_revocable(&self) -> bool {
        matches!(self, CallResult::Revocable(_))
    }

    fn into_fetched(self) -> Fetched<Value> {
        match self {
            CallResult::Plain(value) => Fetched::plain(value),
            CallResult::Revocable(revocable) => Fetched {
                value: revocable.value,
                revoke_keys: revocable.revoke_keys,
            },
        }
    }
}

/// The upstream a memoized method ultimately calls, typically an RPC proxy.
///
/// The memoizer neither knows nor cares how the future is produced.
pub trait DataSource: Send + Sync + 'static {
    /// Invokes `method` with `args` and resolves to its (possibly revocable)
    /// result.
    fn call(
        &self,
        method: &MethodDescriptor,
        args: &[Value],
    ) -> BoxFuture<'static, CacheContents<CallResult>>;
}

/// Cache suppression requested by the caller for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheSuppression {
    /// Read and populate the cache normally.
    #[default]
    DoNotSuppress,
    /// Bypass the cache for calls into the next service.
    UpToNextServices,
    /// Bypass the cache for this call and every downstream call.
    RecursiveAllDownstreamServices,
}

/// Per-call context threaded explicitly through the call path.
///
/// Propagating the suppression flag into downstream calls is the caller's
/// responsibility; the memoizer only reads it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    pub suppression: CacheSuppression,
}

/// Memoizes remote method calls through an [`AsyncCache`].
pub struct AsyncMemoizer {
    source: Arc<dyn DataSource>,
    cache: AsyncCache<Value>,
    metadata: MetadataProvider,
    metrics: SharedMetricsSink,
}

impl std::fmt::Debug for AsyncMemoizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMemoizer")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl AsyncMemoizer {
    pub fn new(
        source: Arc<dyn DataSource>,
        cache: AsyncCache<Value>,
        metrics: SharedMetricsSink,
    ) -> Self {
        Self {
            source,
            cache,
            metadata: MetadataProvider::new(),
            metrics,
        }
    }

    /// The underlying cache, for revoke wiring and observability counters.
    pub fn cache(&self) -> &AsyncCache<Value> {
        &self.cache
    }

    /// Invokes `method` with `args`, serving from the cache per `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotCacheable`] immediately when the method's
    /// return shape cannot be memoized; this is a usage error, not a cache
    /// or upstream failure. Upstream failures surface unchanged when no
    /// cached value exists; a failed background refresh is swallowed and the
    /// stale value returned instead.
    pub async fn memoize(
        &self,
        method: &MethodDescriptor,
        args: &[Value],
        policy: CachingPolicy,
        ctx: CallContext,
    ) -> CacheContents<Value> {
        if method.shape == ReturnShape::NotCacheable {
            return Err(CacheError::NotCacheable(format!(
                "{}.{}",
                method.service, method.method
            )));
        }

        let metadata = self.metadata.get_metadata(method);

        if !policy.enabled || ctx.suppression != CacheSuppression::DoNotSuppress {
            self.metrics.increment("memoizer.bypass");
            tracing::trace!(
                service = method.service,
                method = method.method,
                suppression = ?ctx.suppression,
                "bypassing cache"
            );
            let result = self.source.call(method, args).await?;
            return Ok(result.into_fetched().value);
        }

        let key = self.cache_key(method, args, &metadata.key_argument_indices)?;

        let fetch = {
            let source = Arc::clone(&self.source);
            let method = method.clone();
            let args = args.to_vec();
            let declared_revocable = metadata.is_revocable;
            move || -> BoxFuture<'static, CacheContents<Fetched<Value>>> {
                Box::pin(async move {
                    let result = source.call(&method, &args).await?;
                    if result.is_revocable() != declared_revocable {
                        tracing::debug!(
                            service = method.service,
                            method = method.method,
                            "return shape differs from the method descriptor"
                        );
                    }
                    Ok(result.into_fetched())
                })
            }
        };

        self.cache.get_or_add(&key, policy, fetch).await
    }

    /// Derives the cache key from the method identity and the canonical
    /// serialization of its key-participating arguments.
    fn cache_key(
        &self,
        method: &MethodDescriptor,
        args: &[Value],
        key_argument_indices: &[usize],
    ) -> CacheContents<CacheKey> {
        let mut builder = CacheKey::builder(method.service, method.method);
        for &i in key_argument_indices {
            let name = method.parameters.get(i).map(|p| p.name).unwrap_or("?");
            builder.write_argument(name, args.get(i).unwrap_or(&Value::Null))?;
        }
        Ok(builder.build())
    }
}
