//! Helpers for testing revocache components.
//!
//! When writing tests, call [`setup`] first in every test. This sets up the
//! logger so that all console output is captured by the test runner, and
//! makes `tracing` output from the caching internals visible when a test
//! fails.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the
///    `revocache-service` crate and mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("revocache_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}
