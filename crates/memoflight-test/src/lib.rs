//! Helpers for testing the cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Use a [`CallCounter`] to build computations. It records how often each key was actually
//!    computed, which is what most assertions about coalescing boil down to.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memoflight_service` crate and
///    mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memoflight_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// The error returned by [`CallCounter`] computations for failing keys.
pub fn failure_message(key: u64) -> String {
    format!("computation for key {key} failed")
}

/// Counts how often a computation was invoked, per key.
///
/// Clones share their counts.
#[derive(Clone, Debug, Default)]
pub struct CallCounter {
    calls: Arc<Mutex<BTreeMap<u64, usize>>>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one invocation for `key`.
    pub fn record(&self, key: u64) {
        let mut calls = self.calls.lock().unwrap();
        *calls.entry(key).or_default() += 1;
    }

    /// The total number of invocations.
    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// The number of invocations for `key`.
    pub fn for_key(&self, key: u64) -> usize {
        self.calls.lock().unwrap().get(&key).copied().unwrap_or_default()
    }

    /// All invocations, per key.
    pub fn all_calls(&self) -> Vec<(u64, usize)> {
        let calls = self.calls.lock().unwrap();
        calls.iter().map(|(key, count)| (*key, *count)).collect()
    }

    /// A computation that sleeps for `delay` and then returns its key.
    pub fn identity(
        &self,
        delay: Duration,
    ) -> impl Fn(u64) -> BoxFuture<'static, anyhow::Result<u64>> + Send + Sync + use<> {
        self.failing_on(delay, &[])
    }

    /// Like [`identity`](Self::identity), but fails for all keys in `failing`.
    ///
    /// The error message is [`failure_message`].
    pub fn failing_on(
        &self,
        delay: Duration,
        failing: &[u64],
    ) -> impl Fn(u64) -> BoxFuture<'static, anyhow::Result<u64>> + Send + Sync + use<> {
        let counter = self.clone();
        let failing: Arc<BTreeSet<u64>> = Arc::new(failing.iter().copied().collect());

        move |key| -> BoxFuture<'static, anyhow::Result<u64>> {
            counter.record(key);
            let failing = Arc::clone(&failing);
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if failing.contains(&key) {
                    anyhow::bail!(failure_message(key));
                }
                Ok(key)
            })
        }
    }
}
