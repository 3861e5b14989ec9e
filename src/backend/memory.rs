use std::fmt;
use std::time::Duration;

use moka::sync::Cache;

use super::CacheLike;

/// Default number of entries kept by [`InMemoryCache::default`].
pub const DEFAULT_CAPACITY: u64 = 100;

/// Default time-to-live used by [`InMemoryCache::default`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// An in-memory [`CacheLike`] store backed by [`moka`].
///
/// The store is cheap to clone and clones share a single underlying cache.
pub struct InMemoryCache<V> {
    cache: Cache<String, V>,
}

impl<V> Clone for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<V> fmt::Debug for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("max_capacity", &self.cache.policy().max_capacity())
            .field("time_to_live", &self.cache.policy().time_to_live())
            .finish()
    }
}

impl<V> InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store holding at most `max_capacity` entries, without expiry.
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// Creates a store whose entries expire `ttl` after being written.
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl<V> Default for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::with_ttl(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl<V> CacheLike<V> for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key)
    }

    fn set(&self, key: String, value: V) {
        self.cache.insert(key, value);
    }

    fn delete(&self, key: &str) {
        self.cache.invalidate(key);
    }
}
