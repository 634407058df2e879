use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::BoxFuture;

use memoflight_service::caching::{CacheConfig, Computation, Coordinator};
use memoflight_test::{CallCounter, failure_message};

/// The jobs of the concurrency exercise: 58 requests over 18 distinct keys.
pub const EXERCISE_JOBS: [u64; 58] = [
    44, 46, 47, 49, 44, 34, 47, 41, 41, 33, 43, 40, 46, 43, 45, 49, 34, 47, 36, 43, 48, 41, 35, 46,
    33, 42, 49, 47, 32, 30, 50, 50, 30, 40, 44, 30, 49, 34, 48, 43, 50, 42, 48, 31, 35, 30, 33, 40,
    40, 50, 49, 47, 36, 43, 48, 41, 35, 46,
];

/// A short job list with duplicates, requested in rapid succession.
pub const REPEATED_JOBS: [u64; 9] = [3, 4, 5, 5, 4, 3, 2, 1, 0];

/// Squares its key after a delay.
///
/// Invocations are recorded in `counter`. Fails for all keys in `failing`, and for keys whose
/// square does not fit into a `u64`.
#[derive(Clone, Debug, Default)]
pub struct Squares {
    pub counter: CallCounter,
    pub delay: Duration,
    pub failing: Vec<u64>,
}

impl Squares {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn failing(mut self, keys: &[u64]) -> Self {
        self.failing.extend_from_slice(keys);
        self
    }
}

impl Computation<u64> for Squares {
    type Value = u64;

    fn compute(&self, key: u64) -> BoxFuture<'static, anyhow::Result<u64>> {
        self.counter.record(key);
        let delay = self.delay;
        let fails = self.failing.contains(&key);

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fails {
                anyhow::bail!(failure_message(key));
            }
            key.checked_mul(key)
                .with_context(|| format!("square of {key} overflows"))
        })
    }
}

/// Creates a shareable coordinator for `squares` with default config.
pub fn coordinator(squares: &Squares) -> Arc<Coordinator<u64, Squares>> {
    with_config(squares, CacheConfig::default())
}

pub fn with_config(squares: &Squares, config: CacheConfig) -> Arc<Coordinator<u64, Squares>> {
    Arc::new(Coordinator::with_config(squares.clone(), config))
}
