use std::future::Future;

use futures::future::BoxFuture;

/// The expensive computation that is memoized by a [`Coordinator`](super::Coordinator).
///
/// The computation is owned by the coordinator and invoked by whichever caller wins the leader
/// election for a key, on that caller's own task. It is expected to be deterministic per key, though
/// this is not enforced: the coordinator only guarantees that it is not run concurrently for the
/// same key, and not run again for a key whose value is still cached.
///
/// A computation may request *other* keys from the coordinator running it, for instance to build
/// on smaller results. Such a computation holds a [`Weak`](std::sync::Weak) reference to its
/// coordinator, created with [`Arc::new_cyclic`](std::sync::Arc::new_cyclic). It must never
/// request its own key, directly or through a cycle of keys: it would become a waiter of its own
/// episode and never finish.
///
/// Any `Fn(K) -> impl Future<Output = anyhow::Result<V>>` is a computation:
///
/// ```
/// # async fn run() -> Result<(), memoflight_service::caching::CacheError> {
/// use memoflight_service::caching::Coordinator;
///
/// let coordinator = Coordinator::new(|key: u64| async move { Ok::<_, anyhow::Error>(key * 2) });
/// assert_eq!(coordinator.get(21).await?, 42);
/// # Ok(())
/// # }
/// ```
pub trait Computation<K>: Send + Sync + 'static {
    /// The value produced for a key.
    type Value: Clone + Send + Sync + 'static;

    /// Computes the value for `key`.
    fn compute(&self, key: K) -> BoxFuture<'static, anyhow::Result<Self::Value>>;
}

impl<K, V, F, Fut> Computation<K> for F
where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn compute(&self, key: K) -> BoxFuture<'static, anyhow::Result<V>> {
        Box::pin(self(key))
    }
}
