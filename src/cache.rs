//! Response caching for Tower HTTP clients.
//!
//! [`CacheLayer`] stores the shared dispatch for a request under its key.
//! Repeated reads are answered from the store, including reads that arrive
//! while the first dispatch is still running. Failures and responses whose
//! status is not cacheable are evicted before any caller sees them. Per
//! request, the [`CacheFlag`], [`ForceUpdate`] and
//! [`RequestKey`](crate::extensions::RequestKey) extensions override the
//! layer's configuration.

use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Method, Request, Response, Uri};
use http_body::Body;
use http_body_util::Full;
use tower::{Layer, Service};

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

use crate::backend::memory::InMemoryCache;
use crate::backend::CacheLike;
use crate::error::{BoxError, SharedError};
use crate::extensions::{CacheFlag, DynCache, ForceUpdate};
use crate::key::KeyExtractor;
use crate::policy::{CachePolicy, MethodFilter};
use crate::shared::{dispatch, respond, SharedResponse, Ticket};

/// Caching enhancer for Tower HTTP clients.
///
/// The layer keeps the *pending* dispatch in the cache, so callers that ask
/// for the same key before the first response arrives share that dispatch
/// instead of starting their own. Failed dispatches are evicted before the
/// failure reaches any caller. Create instances via [`CacheLayer::builder`]
/// or [`CacheLayer::new`].
///
/// Cloning a `CacheLayer` is cheap and shares the underlying cache.
#[derive(Clone)]
pub struct CacheLayer {
    cache: DynCache,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
}

/// Builder for configuring [`CacheLayer`] instances.
pub struct CacheLayerBuilder {
    cache: DynCache,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
}

impl CacheLayerBuilder {
    pub fn new<C>(cache: C) -> Self
    where
        C: CacheLike<SharedResponse> + 'static,
    {
        Self {
            cache: Arc::new(cache),
            policy: CachePolicy::default(),
            key_extractor: KeyExtractor::default(),
        }
    }

    /// Replaces the cache policy with a pre-built value.
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets which request methods are cached. Defaults to `GET` and `HEAD`.
    pub fn methods(mut self, methods: MethodFilter) -> Self {
        self.policy = self.policy.with_methods(methods);
        self
    }

    pub fn method_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        self.policy = self.policy.with_method_predicate(predicate);
        self
    }

    /// Whether requests without a [`CacheFlag`] are cached. Defaults to `true`.
    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.policy = self.policy.with_enabled_by_default(enabled);
        self
    }

    pub fn respect_cache_control(mut self, enabled: bool) -> Self {
        self.policy = self.policy.with_respect_cache_control(enabled);
        self
    }

    /// Sets which response statuses are kept. Defaults to every `2xx` status.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.policy = self.policy.with_statuses(statuses);
        self
    }

    /// Refreshes the cached entry for every request matching `predicate`.
    pub fn force_update_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method, &Uri, &http::HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.policy = self.policy.with_force_update(predicate);
        self
    }

    pub fn key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    pub fn build(self) -> CacheLayer {
        CacheLayer {
            cache: self.cache,
            policy: self.policy,
            key_extractor: self.key_extractor,
        }
    }
}

impl CacheLayer {
    /// Builds a cache layer with the default [`CachePolicy`].
    pub fn new<C>(cache: C) -> Self
    where
        C: CacheLike<SharedResponse> + 'static,
    {
        CacheLayerBuilder::new(cache).build()
    }

    /// Returns a builder for fine-grained control over the cache policy.
    pub fn builder<C>(cache: C) -> CacheLayerBuilder
    where
        C: CacheLike<SharedResponse> + 'static,
    {
        CacheLayerBuilder::new(cache)
    }

    /// Creates a cache layer backed by an [`InMemoryCache`] holding at most
    /// `max_capacity` entries for five minutes each.
    pub fn new_in_memory(max_capacity: u64) -> Self {
        Self::new(InMemoryCache::with_ttl(
            max_capacity,
            crate::backend::memory::DEFAULT_TTL,
        ))
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Returns the cache shared by every service built from this layer.
    pub fn cache(&self) -> &DynCache {
        &self.cache
    }

    /// Drops the entry stored under `key`.
    pub fn invalidate(&self, key: &str) {
        self.cache.delete(key);
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new(InMemoryCache::default())
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            cache: self.cache.clone(),
            policy: self.policy.clone(),
            key_extractor: self.key_extractor.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CacheService<S> {
    inner: S,
    cache: DynCache,
    policy: CachePolicy,
    key_extractor: KeyExtractor,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError> + Send,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let inner = self.inner.clone();
        let flag = req.extensions().get::<CacheFlag>().cloned();

        let enabled = match flag {
            Some(CacheFlag::Disabled) => false,
            Some(_) => true,
            None => self.policy.enabled_by_default(),
        };
        let key = if enabled
            && self.policy.should_cache_method(req.method())
            && !self.policy.forbids_store(req.headers())
        {
            self.key_extractor
                .resolve(req.method(), req.uri(), req.extensions())
        } else {
            None
        };

        let Some(key) = key else {
            #[cfg(feature = "tracing")]
            tracing::debug!(method = %req.method(), uri = %req.uri(), "cache_bypass");
            #[cfg(feature = "metrics")]
            counter!("tower_http_enhancers.cache.bypass").increment(1);

            return Box::pin(async move {
                dispatch(inner, req)
                    .await
                    .map(|entry| entry.into_response())
            });
        };

        let cache = match flag {
            Some(CacheFlag::Custom(cache)) => cache,
            _ => self.cache.clone(),
        };

        let force = req.extensions().get::<ForceUpdate>().is_some()
            || self
                .policy
                .forces_update(req.method(), req.uri(), req.headers());

        if force {
            #[cfg(feature = "tracing")]
            tracing::debug!(key = %key, "cache_force_update");
            #[cfg(feature = "metrics")]
            counter!("tower_http_enhancers.cache.force_update").increment(1);

            let policy = self.policy.clone();
            return Box::pin(async move {
                let entry = dispatch(inner, req).await?;
                if policy.should_cache_status(entry.status) {
                    cache.set(key, SharedResponse::ready(entry.clone()));
                }
                Ok(entry.into_response())
            });
        }

        if let Some(hit) = cache.get(&key) {
            #[cfg(feature = "tracing")]
            tracing::debug!(key = %key, settled = hit.peek().is_some(), "cache_hit");
            #[cfg(feature = "metrics")]
            counter!("tower_http_enhancers.cache.hit").increment(1);

            return Box::pin(respond(hit));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %key, "cache_miss");
        #[cfg(feature = "metrics")]
        counter!("tower_http_enhancers.cache.miss").increment(1);

        let ticket = Ticket::new();
        let shared = SharedResponse::new(&ticket, {
            let cache = cache.clone();
            let key = key.clone();
            let ticket = ticket.clone();
            let policy = self.policy.clone();
            async move {
                #[cfg(feature = "metrics")]
                let start = std::time::Instant::now();
                let outcome = dispatch(inner, req).await;
                #[cfg(feature = "metrics")]
                histogram!("tower_http_enhancers.cache.dispatch_latency")
                    .record(start.elapsed().as_secs_f64());

                match outcome {
                    Ok(entry) => {
                        if !policy.should_cache_status(entry.status) {
                            evict_own(cache.as_ref(), &key, &ticket);
                        }
                        Ok(entry)
                    }
                    Err(err) => {
                        evict_own(cache.as_ref(), &key, &ticket);
                        Err(SharedError::new(err))
                    }
                }
            }
        });

        // Stored before anything polls it, so later callers find this dispatch.
        cache.set(key, shared.clone());
        Box::pin(respond(shared))
    }
}

/// Removes `key` unless it has since been replaced by another dispatch.
///
/// Runs before the outcome reaches any caller, for failures and for
/// responses whose status is not cacheable.
fn evict_own(cache: &dyn CacheLike<SharedResponse>, key: &str, ticket: &Ticket) {
    let still_ours = cache
        .get(key)
        .is_some_and(|current| ticket.issued(&current));
    if still_ours {
        #[cfg(feature = "tracing")]
        tracing::debug!(key = %key, "cache_evict");
        #[cfg(feature = "metrics")]
        counter!("tower_http_enhancers.cache.evict").increment(1);

        cache.delete(key);
    }
}
