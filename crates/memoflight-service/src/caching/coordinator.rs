use std::fmt;
use std::hash::Hash;
use std::time::{Duration, Instant};

use sentry::{Hub, SentryFutureExt};

use super::{
    CacheConfig, CacheContents, CacheError, CacheStore, Computation, InFlightRegistry, LeaderGuard,
    WaiterHandle,
};

/// The state a key is in, as observed by [`Coordinator::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Nothing is known about the key. The next access computes it.
    Idle,
    /// A computation for the key is running. The next access joins it.
    InProgress,
    /// The value is stored. The next access returns it without computing.
    Cached,
}

/// What a caller does after leader election.
enum Role<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// The value was stored while we were electing a leader.
    Hit(V),
    /// We run the computation.
    Leader(LeaderGuard<'a, K, V>),
    /// Somebody else runs the computation, and we wait for it.
    Waiter(WaiterHandle<V>),
}

/// Memoizes a [`Computation`], coalescing concurrent requests for the same key.
///
/// Values are computed by the first caller requesting a key, the *leader*. Callers requesting the
/// same key while the leader is still computing become *waiters*: they do not compute anything
/// themselves, but receive a copy of the leader's outcome, be it a value or an error. Successful
/// values are kept in a [`CacheStore`] and served from there, errors are not kept at all.
///
/// Computations for different keys run fully independently of each other.
pub struct Coordinator<K, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Computation<K>,
{
    config: CacheConfig,
    computation: C,
    store: CacheStore<K, C::Value>,
    inflight: InFlightRegistry<K, C::Value>,
}

impl<K, C> Coordinator<K, C>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    C: Computation<K>,
{
    /// Creates a new coordinator for `computation`, with an unbounded store.
    pub fn new(computation: C) -> Self {
        Self::with_config(computation, CacheConfig::default())
    }

    /// Creates a new coordinator for `computation`.
    pub fn with_config(computation: C, config: CacheConfig) -> Self {
        let store = CacheStore::new(&config);
        Self {
            config,
            computation,
            store,
            inflight: InFlightRegistry::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The computation this coordinator memoizes.
    pub fn computation(&self) -> &C {
        &self.computation
    }

    /// Returns the value for `key`, computing it if necessary.
    ///
    /// A stored value is returned right away. Otherwise this either runs the computation, or waits
    /// for an already running computation of the same key to finish. Waiting is bounded by
    /// [`CacheConfig::wait_timeout`], if set.
    ///
    /// # Errors
    ///
    /// Errors of the computation are returned as [`CacheError::ComputationFailed`], both to the
    /// caller that ran it and to all callers waiting for it. They are not stored, so the next call
    /// for the same key runs the computation again.
    pub async fn get(&self, key: K) -> CacheContents<C::Value> {
        self.get_inner(key, self.config.wait_timeout).await
    }

    /// Like [`get`](Self::get), but waits at most `timeout` for a computation started by another
    /// caller.
    ///
    /// The timeout does not apply if this call ends up running the computation itself.
    pub async fn get_with_timeout(&self, key: K, timeout: Duration) -> CacheContents<C::Value> {
        self.get_inner(key, Some(timeout)).await
    }

    async fn get_inner(&self, key: K, wait_timeout: Option<Duration>) -> CacheContents<C::Value> {
        let name = self.config.name.as_str();
        metric!(counter("caches.access") += 1, "cache" => name);

        if let Some(value) = self.store.get(&key) {
            metric!(counter("caches.memory.hit") += 1, "cache" => name);
            return Ok(value);
        }

        match self.join_or_lead(&key) {
            Role::Hit(value) => {
                metric!(counter("caches.memory.hit") += 1, "cache" => name);
                Ok(value)
            }
            Role::Leader(guard) => self.lead(key, guard).await,
            Role::Waiter(handle) => {
                metric!(counter("caches.channel.hit") += 1, "cache" => name);
                tracing::trace!(?key, "Joining running {name} computation");

                let outcome = match wait_timeout {
                    Some(timeout) => handle.wait_timeout(timeout).await,
                    None => handle.wait().await,
                };
                if let Err(CacheError::AbandonedWait(timeout)) = &outcome {
                    metric!(counter("caches.waiter.abandoned") += 1, "cache" => name);
                    tracing::warn!(?key, ?timeout, "Gave up waiting for {name} computation");
                }
                if let Err(err) = &outcome {
                    metric!(
                        counter("caches.waiter.error") += 1,
                        "cache" => name,
                        "kind" => err.kind(),
                    );
                }
                outcome
            }
        }
    }

    /// Decides, in one exclusive section, whether the caller leads or waits.
    ///
    /// The store is checked again under the registry lock. A leader stores its value before it
    /// drains its waiters under that same lock, so a miss here means the key is either idle or has a
    /// running computation we can still join.
    fn join_or_lead(&self, key: &K) -> Role<'_, K, C::Value> {
        let mut inflight = self.inflight.lock();

        if let Some(value) = self.store.get(key) {
            Role::Hit(value)
        } else if inflight.try_become_leader(key) {
            Role::Leader(self.inflight.leader_guard(key.clone()))
        } else {
            Role::Waiter(inflight.register_waiter(key))
        }
    }

    async fn lead(
        &self,
        key: K,
        guard: LeaderGuard<'_, K, C::Value>,
    ) -> CacheContents<C::Value> {
        let name = self.config.name.as_str();
        metric!(counter("caches.computation") += 1, "cache" => name);
        tracing::trace!(?key, "Computing {name}");

        let start = Instant::now();
        let result = self
            .computation
            .compute(key.clone())
            // Scope changes made by the computation stay with the computation.
            .bind_hub(Hub::new_from_top(Hub::current()))
            .await;
        metric!(timer("caches.computation.duration") = start.elapsed(), "cache" => name);

        let outcome = match result {
            Ok(value) => {
                self.store.set(key.clone(), value.clone());
                Ok(value)
            }
            Err(err) => {
                metric!(counter("caches.computation.failed") += 1, "cache" => name);
                let err = CacheError::computation_failed(err);
                tracing::debug!(?key, error = %err, "{name} computation failed");
                Err(err)
            }
        };

        let notified = guard.complete(outcome.clone());
        metric!(histogram("caches.waiters.notified") = notified as u64, "cache" => name);

        outcome
    }

    /// The current state of `key`.
    pub fn state(&self, key: &K) -> KeyState {
        let inflight = self.inflight.lock();

        if self.store.get(key).is_some() {
            KeyState::Cached
        } else if inflight.is_in_progress(key) {
            KeyState::InProgress
        } else {
            KeyState::Idle
        }
    }

    /// Removes the stored value for `key`, so that it is computed again on next access.
    ///
    /// A computation that is currently running for `key` is not affected, and will store its value
    /// once it completes.
    pub fn invalidate(&self, key: &K) {
        self.store.invalidate(key);
    }

    /// Removes all stored values.
    pub fn invalidate_all(&self) {
        self.store.invalidate_all();
    }

    /// The number of stored values.
    pub fn entry_count(&self) -> u64 {
        self.store.entry_count()
    }

    /// The number of currently running computations.
    pub fn in_flight(&self) -> usize {
        self.inflight.in_flight()
    }
}

impl<K, C> fmt::Debug for Coordinator<K, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Computation<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("inflight", &self.inflight)
            .finish()
    }
}
