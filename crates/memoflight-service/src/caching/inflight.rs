use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::channel::oneshot;

use super::{CacheContents, CacheError};

type WaiterSet<V> = Vec<oneshot::Sender<CacheContents<V>>>;

/// Keeps track of running computations, and of the callers waiting for them.
///
/// A key with a record in the registry is *in progress*. The record holds the senders of all
/// waiters that joined the running computation, in the order they joined. Records are created by
/// [`InFlightGuard::try_become_leader`] and removed, together with all waiters, by
/// [`complete_and_drain`](Self::complete_and_drain). There is no other way for a record to go away,
/// and none for it to outlive its computation.
///
/// All state transitions happen under one lock. That lock is only ever held for bookkeeping, and
/// never while a computation is running.
pub struct InFlightRegistry<K, V> {
    episodes: Mutex<HashMap<K, WaiterSet<V>>>,
}

impl<K, V> InFlightRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            episodes: Mutex::new(HashMap::new()),
        }
    }

    /// Enters the exclusive section of the registry.
    ///
    /// Every check made through the returned guard stays valid until the guard is dropped. The guard
    /// must not be held across an `.await`.
    pub fn lock(&self) -> InFlightGuard<'_, K, V> {
        // Nothing panics while holding this lock, but a poisoned registry must stay usable anyway.
        let episodes = self.episodes.lock().unwrap_or_else(PoisonError::into_inner);
        InFlightGuard { episodes }
    }

    /// Ends the running episode for `key`, handing `outcome` to every registered waiter.
    ///
    /// The record for `key` is removed, which makes the key idle again. Delivery never blocks: waiters
    /// that have stopped listening are skipped. Returns the number of waiters the outcome was
    /// delivered to.
    ///
    /// This must only be called by the leader of the episode, see [`LeaderGuard`].
    pub fn complete_and_drain(&self, key: &K, outcome: CacheContents<V>) -> usize {
        let Some(waiters) = self.lock().episodes.remove(key) else {
            return 0;
        };

        // The record is gone, so no new waiter can join this set anymore.
        let registered = waiters.len();
        let delivered = waiters
            .into_iter()
            .filter_map(|waiter| waiter.send(outcome.clone()).ok())
            .count();

        tracing::trace!(registered, delivered, "Drained waiters of finished computation");
        delivered
    }

    /// Creates the guard the leader of `key` holds while computing.
    ///
    /// Call this right after [`InFlightGuard::try_become_leader`] returned `true` for `key`.
    pub fn leader_guard(&self, key: K) -> LeaderGuard<'_, K, V> {
        LeaderGuard {
            registry: self,
            key: Some(key),
        }
    }

    /// Whether a computation for `key` is currently running.
    pub fn is_in_progress(&self, key: &K) -> bool {
        self.lock().is_in_progress(key)
    }

    /// The number of currently running computations.
    pub fn in_flight(&self) -> usize {
        self.lock().episodes.len()
    }
}

impl<K, V> Default for InFlightRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for InFlightRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .episodes
            .try_lock()
            .map(|episodes| episodes.len())
            .unwrap_or_default();
        f.debug_struct("InFlightRegistry")
            .field("running computations", &running)
            .finish()
    }
}

/// Exclusive access to an [`InFlightRegistry`], see [`InFlightRegistry::lock`].
pub struct InFlightGuard<'a, K, V> {
    episodes: MutexGuard<'a, HashMap<K, WaiterSet<V>>>,
}

impl<K, V> InFlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    /// Marks `key` as in progress, unless it already is.
    ///
    /// Returns `true` if the caller is now the leader for `key`. For every episode, this returns
    /// `true` exactly once.
    pub fn try_become_leader(&mut self, key: &K) -> bool {
        if self.episodes.contains_key(key) {
            return false;
        }
        self.episodes.insert(key.clone(), Vec::new());
        true
    }

    /// Whether a computation for `key` is currently running.
    pub fn is_in_progress(&self, key: &K) -> bool {
        self.episodes.contains_key(key)
    }

    /// Joins the running computation for `key`.
    ///
    /// The key has to be in progress, which is the case when [`try_become_leader`] returned `false`
    /// through this same guard. For an idle key, the returned handle resolves to
    /// [`CacheError::LeaderDropped`] immediately.
    ///
    /// [`try_become_leader`]: Self::try_become_leader
    pub fn register_waiter(&mut self, key: &K) -> WaiterHandle<V> {
        let (sender, receiver) = oneshot::channel();
        match self.episodes.get_mut(key) {
            Some(waiters) => waiters.push(sender),
            None => tracing::error!("Registered a waiter for a key that is not in progress"),
        }
        WaiterHandle { receiver }
    }
}

/// The receiving end of a waiter, see [`InFlightGuard::register_waiter`].
///
/// Dropping the handle abandons the wait without affecting the computation or any other waiter.
#[derive(Debug)]
#[must_use = "a waiter handle does nothing unless waited on"]
pub struct WaiterHandle<V> {
    receiver: oneshot::Receiver<CacheContents<V>>,
}

impl<V> WaiterHandle<V> {
    /// Waits for the outcome of the computation.
    pub async fn wait(self) -> CacheContents<V> {
        self.receiver
            .await
            .unwrap_or_else(|_cancelled_error| Err(CacheError::LeaderDropped))
    }

    /// Waits for the outcome of the computation, giving up after `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> CacheContents<V> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(CacheError::AbandonedWait(timeout)),
        }
    }
}

/// Held by the leader of an episode while it computes.
///
/// [`complete`](Self::complete) ends the episode with the computed outcome. If the guard is
/// dropped before that, because the leading future was dropped or the computation panicked, the
/// episode ends with [`CacheError::LeaderDropped`] so that no waiter is left hanging.
pub struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    registry: &'a InFlightRegistry<K, V>,
    key: Option<K>,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Ends the episode, handing `outcome` to all waiters.
    ///
    /// Returns the number of waiters the outcome was delivered to.
    pub fn complete(mut self, outcome: CacheContents<V>) -> usize {
        match self.key.take() {
            Some(key) => self.registry.complete_and_drain(&key, outcome),
            None => 0,
        }
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let abandoned = self
                .registry
                .complete_and_drain(&key, Err(CacheError::LeaderDropped));
            tracing::warn!(abandoned, "Computation was dropped before it finished");
        }
    }
}
