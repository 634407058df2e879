use std::fmt;
use std::hash::Hash;

use moka::sync::Cache;

use crate::config::CacheConfig;

/// The in-memory store of successfully computed values.
///
/// This is a thin layer over a [`moka`] cache. It does no coalescing on its own: making sure that
/// only one caller computes and [`set`](Self::set)s a value per key is up to the
/// [`Coordinator`](super::Coordinator).
///
/// A value written with [`set`](Self::set) is visible to [`get`](Self::get) as soon as `set`
/// returns.
pub struct CacheStore<K, V> {
    entries: Cache<K, V>,
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new store, bounded by the capacity and TTL given in `config`, if any.
    pub fn new(config: &CacheConfig) -> Self {
        let mut builder = Cache::builder().name(&config.name);
        if let Some(max_capacity) = config.max_capacity {
            builder = builder.max_capacity(max_capacity);
        }
        if let Some(time_to_live) = config.time_to_live {
            builder = builder.time_to_live(time_to_live);
        }

        Self {
            entries: builder.build(),
        }
    }

    /// Returns the stored value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key)
    }

    /// Stores `value` for `key`, replacing any previous value.
    pub fn set(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    /// Removes the value for `key`, so that it is computed again on next access.
    pub fn invalidate(&self, key: &K) {
        self.entries.invalidate(key);
    }

    /// Removes all values.
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    /// The number of stored values.
    ///
    /// Evictions are processed lazily, so this applies all pending evictions first.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

impl<K, V> fmt::Debug for CacheStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.entries.name())
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
