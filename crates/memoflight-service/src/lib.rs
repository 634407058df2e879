//! A request-coalescing, memoizing cache for expensive keyed computations.
//!
//! The [`Coordinator`](caching::Coordinator) runs a [`Computation`](caching::Computation) at most
//! once per key and episode: concurrent callers for the same key share a single execution and all
//! observe the same outcome. See the [`caching`] module for how this works.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
