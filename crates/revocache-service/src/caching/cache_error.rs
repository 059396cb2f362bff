use std::time::Duration;

use thiserror::Error;

/// An error surfaced by the caching subsystem.
///
/// The enum is `Clone` because a single failed fetch is shared with every
/// caller that was coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The upstream data source failed to produce a value.
    ///
    /// The attached string is the upstream's error rendering; the cache
    /// treats it as opaque.
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    /// The upstream data source did not respond in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The method handed to the memoizer cannot be cached.
    ///
    /// This is a usage error raised before any upstream call is made; it is
    /// never retried and never cached.
    #[error("method is not cacheable: {0}")]
    NotCacheable(String),
    /// An unexpected error in revocache itself.
    #[error("internal error")]
    InternalError,
}

impl From<serde_json::Error> for CacheError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The outcome of a cache operation: either `Ok(T)` or the reason why no
/// value could be produced.
pub type CacheContents<T = ()> = Result<T, CacheError>;
