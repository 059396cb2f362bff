//! Revocation-aware memoization for remote service calls.
//!
//! `revocache` is the caching engine behind a client-side service proxy: it
//! memoizes the results of remote calls, refreshes stale entries in the
//! background while still serving the old value, and invalidates entries when
//! an external channel announces that the underlying data changed (a "revoke"
//! event).
//!
//! The interesting parts live in the [`caching`] module; [`config`],
//! [`logging`], [`metrics`] and [`services`] carry the surrounding service
//! plumbing.

pub mod caching;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod services;

mod utils;
