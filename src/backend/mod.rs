//! Cache stores usable by the cache enhancer.
//!
//! The cache enhancer only needs three operations from its store: read a
//! value by key, store a value under a key, and remove a key. Anything that
//! provides them implements [`CacheLike`]. This module ships with:
//! - [`memory::InMemoryCache`]: a bounded, process-local store backed by [`moka`].
//! - [`FnCache`]: a store assembled from closures, for external caches that
//!   only expose plain functions. Its capabilities are checked when it is
//!   built, not when a request is served.
//!
//! Eviction, capacity and expiry are the store's business, never the
//! enhancer's.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;

/// Minimal contract a cache must satisfy to back the cache enhancer.
pub trait CacheLike<V>: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<V>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: String, value: V);

    /// Removes `key` from the cache. Missing keys are ignored.
    fn delete(&self, key: &str);

    /// Alias of [`CacheLike::delete`] for stores that name removal `del`.
    fn del(&self, key: &str) {
        self.delete(key)
    }
}

impl<V, C> CacheLike<V> for Arc<C>
where
    C: CacheLike<V> + ?Sized,
{
    fn get(&self, key: &str) -> Option<V> {
        (**self).get(key)
    }

    fn set(&self, key: String, value: V) {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) {
        (**self).delete(key)
    }
}

type GetFn<V> = Arc<dyn Fn(&str) -> Option<V> + Send + Sync>;
type SetFn<V> = Arc<dyn Fn(String, V) + Send + Sync>;
type DeleteFn = Arc<dyn Fn(&str) + Send + Sync>;

/// A [`CacheLike`] store assembled from closures.
///
/// ```
/// use std::collections::HashMap;
/// use std::sync::{Arc, Mutex};
/// use tower_http_enhancers::backend::{CacheLike, FnCache};
///
/// let map = Arc::new(Mutex::new(HashMap::<String, u32>::new()));
/// let cache = FnCache::builder()
///     .get({
///         let map = map.clone();
///         move |key: &str| map.lock().unwrap().get(key).copied()
///     })
///     .set({
///         let map = map.clone();
///         move |key, value| {
///             map.lock().unwrap().insert(key, value);
///         }
///     })
///     .del({
///         let map = map.clone();
///         move |key: &str| {
///             map.lock().unwrap().remove(key);
///         }
///     })
///     .build()
///     .expect("all capabilities present");
///
/// cache.set("a".into(), 1);
/// assert_eq!(cache.get("a"), Some(1));
/// ```
pub struct FnCache<V> {
    get: GetFn<V>,
    set: SetFn<V>,
    delete: DeleteFn,
}

impl<V> Clone for FnCache<V> {
    fn clone(&self) -> Self {
        Self {
            get: self.get.clone(),
            set: self.set.clone(),
            delete: self.delete.clone(),
        }
    }
}

impl<V> fmt::Debug for FnCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCache").finish_non_exhaustive()
    }
}

impl<V> FnCache<V> {
    pub fn builder() -> FnCacheBuilder<V> {
        FnCacheBuilder::default()
    }
}

impl<V> CacheLike<V> for FnCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        (self.get)(key)
    }

    fn set(&self, key: String, value: V) {
        (self.set)(key, value)
    }

    fn delete(&self, key: &str) {
        (self.delete)(key)
    }
}

/// Builder for [`FnCache`].
///
/// Removal may be registered under either [`FnCacheBuilder::delete`] or
/// [`FnCacheBuilder::del`]; both fill the same capability.
pub struct FnCacheBuilder<V> {
    get: Option<GetFn<V>>,
    set: Option<SetFn<V>>,
    delete: Option<DeleteFn>,
}

impl<V> Default for FnCacheBuilder<V> {
    fn default() -> Self {
        Self {
            get: None,
            set: None,
            delete: None,
        }
    }
}

impl<V> FnCacheBuilder<V> {
    pub fn get<F>(mut self, func: F) -> Self
    where
        F: Fn(&str) -> Option<V> + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(func));
        self
    }

    pub fn set<F>(mut self, func: F) -> Self
    where
        F: Fn(String, V) + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(func));
        self
    }

    pub fn delete<F>(mut self, func: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.delete = Some(Arc::new(func));
        self
    }

    pub fn del<F>(self, func: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.delete(func)
    }

    /// Reports whether retrieval, storage and removal are all present.
    pub fn is_cache_like(&self) -> bool {
        self.get.is_some() && self.set.is_some() && self.delete.is_some()
    }

    /// Validates the capabilities and builds the cache.
    ///
    /// The first missing capability, in `get`, `set`, `delete` order, is
    /// reported.
    pub fn build(self) -> Result<FnCache<V>, ConfigError> {
        Ok(FnCache {
            get: self.get.ok_or(ConfigError::MissingCapability("get"))?,
            set: self.set.ok_or(ConfigError::MissingCapability("set"))?,
            delete: self
                .delete
                .ok_or(ConfigError::MissingCapability("delete"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn empty_builder_is_not_cache_like() {
        let builder = FnCache::<u8>::builder();
        assert!(!builder.is_cache_like());
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigError::MissingCapability("get")
        );
    }

    #[test]
    fn each_missing_capability_is_reported() {
        let no_set = FnCache::<u8>::builder().get(|_| None).del(|_| {});
        assert!(!no_set.is_cache_like());
        assert_eq!(
            no_set.build().unwrap_err(),
            ConfigError::MissingCapability("set")
        );

        let no_removal = FnCache::<u8>::builder().get(|_| None).set(|_, _| {});
        assert!(!no_removal.is_cache_like());
        assert_eq!(
            no_removal.build().unwrap_err(),
            ConfigError::MissingCapability("delete")
        );
    }

    #[test]
    fn removal_accepted_under_either_name() {
        let with_del = FnCache::<u8>::builder()
            .get(|_| None)
            .set(|_, _| {})
            .del(|_| {});
        assert!(with_del.is_cache_like());

        let with_delete = FnCache::<u8>::builder()
            .get(|_| None)
            .set(|_, _| {})
            .delete(|_| {});
        assert!(with_delete.is_cache_like());
        assert!(with_delete.build().is_ok());
    }

    #[test]
    fn fn_cache_forwards_to_closures() {
        let map = Arc::new(Mutex::new(HashMap::<String, u32>::new()));
        let cache = FnCache::builder()
            .get({
                let map = map.clone();
                move |key: &str| map.lock().unwrap().get(key).copied()
            })
            .set({
                let map = map.clone();
                move |key, value| {
                    map.lock().unwrap().insert(key, value);
                }
            })
            .delete({
                let map = map.clone();
                move |key: &str| {
                    map.lock().unwrap().remove(key);
                }
            })
            .build()
            .expect("cache builds");

        cache.set("k".into(), 7);
        assert_eq!(cache.get("k"), Some(7));
        cache.del("k");
        assert_eq!(cache.get("k"), None);
    }
}
