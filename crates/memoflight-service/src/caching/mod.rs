//! # Request coalescing
//!
//! Memoizing an expensive computation is easy. Doing it under concurrency without running the
//! computation more than once per key is the part this module is about.
//!
//! ## Layers
//!
//! - The [`CacheStore`] holds successfully computed values. It is the source of truth for "already
//!   computed" and is consulted first, without taking any lock of our own.
//! - The [`InFlightRegistry`] tracks which keys are currently being computed, and which callers are
//!   waiting for each of those computations.
//! - The [`Coordinator`] ties both together and invokes the user supplied [`Computation`].
//!
//! A request goes through the following steps:
//! - First, it goes through the [`CacheStore`]. A hit is returned right away.
//! - On miss, it enters the exclusive section of the [`InFlightRegistry`]. There it looks at the
//!   [`CacheStore`] once more, then either becomes the *leader* for that key, or registers itself as
//!   a *waiter* of the running computation.
//! - The leader runs the computation with no lock held, stores a successful value and then hands the
//!   outcome to every registered waiter, removing the in-flight record in the same step.
//!
//! The leader writes the value to the store *before* it drains the waiters, and waiters register
//! under the same lock that draining takes. A caller therefore either sees the stored value, or ends
//! up in a waiter set that is guaranteed to be drained.
//!
//! ## Failures
//!
//! Failed computations are never stored. Their error is handed to the leader and every waiter of
//! that episode, after which the key is idle again and the next caller retries. The same happens
//! when the leader goes away before finishing (its future was dropped, or the computation panicked):
//! waiters then receive [`CacheError::LeaderDropped`].
//!
//! ## Growth
//!
//! By default the [`CacheStore`] grows without bound. [`CacheConfig::max_capacity`] and
//! [`CacheConfig::time_to_live`] can be used to bound it. The in-flight registry only ever holds
//! records for computations that are currently running.
//!
//! ### Metrics
//!
//! All metrics are tagged with a `cache` field holding [`CacheConfig::name`]:
//!
//! - `caches.access`: All accesses.
//! - `caches.memory.hit`: Accesses served by the [`CacheStore`].
//! - `caches.channel.hit`: Accesses that joined an already running computation.
//! - `caches.computation`: Actual computations being run.
//! - `caches.computation.failed`: Computations that returned an error.
//! - `caches.computation.duration`: How long computations took.
//! - `caches.waiters.notified`: How many waiters were still listening when an episode ended.
//! - `caches.waiter.abandoned`: Waiters that gave up before an outcome was delivered.
//! - `caches.waiter.error`: Waiters that received an error, tagged with its `kind`.

mod computation;
mod coordinator;
mod error;
mod inflight;
mod store;


pub use computation::*;
pub use coordinator::*;
pub use error::*;
pub use inflight::*;
pub use store::*;

pub use crate::config::CacheConfig;
