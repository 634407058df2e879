use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// An error that ends a [`Coordinator::get`](super::Coordinator::get) call without a value.
///
/// Errors are never cached. Every variant leaves the key either idle or still in flight, so a later
/// call will start or join a fresh computation.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The computation itself returned an error.
    ///
    /// The leader and all waiters of the same episode receive the same [`Arc`].
    #[error("computation failed: {0:#}")]
    ComputationFailed(Arc<anyhow::Error>),
    /// A waiter gave up waiting for the running computation.
    ///
    /// This only affects the caller that timed out, the computation keeps running for everybody else.
    #[error("gave up waiting for computation after {0:?}")]
    AbandonedWait(Duration),
    /// The leader went away before producing an outcome.
    ///
    /// This happens when the future of the leading caller is dropped, or when the computation panics.
    #[error("computation was abandoned by its leader")]
    LeaderDropped,
}

impl CacheError {
    /// Wraps the error of a failed computation.
    pub fn computation_failed(err: anyhow::Error) -> Self {
        Self::ComputationFailed(Arc::new(err))
    }

    /// A short, static name of the error kind, used for metric tags.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ComputationFailed(_) => "computation_failed",
            Self::AbandonedWait(_) => "abandoned_wait",
            Self::LeaderDropped => "leader_dropped",
        }
    }
}

impl PartialEq for CacheError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // failures are only equal when they stem from the very same computation
            (Self::ComputationFailed(a), Self::ComputationFailed(b)) => Arc::ptr_eq(a, b),
            (Self::AbandonedWait(a), Self::AbandonedWait(b)) => a == b,
            (Self::LeaderDropped, Self::LeaderDropped) => true,
            _ => false,
        }
    }
}

/// The outcome of a computation as handed out to the leader and its waiters.
pub type CacheContents<T> = Result<T, CacheError>;
