//! Collapsing of concurrent identical requests.
//!
//! [`ThrottleLayer`] keeps a registry of dispatches that are still in
//! flight. A request whose key is already registered joins the pending
//! dispatch instead of starting a new one; all callers observe the same
//! outcome. The entry is dropped as soon as the dispatch settles, so the next
//! request after that goes to the wrapped service again.
//!
//! A non-zero [`ThrottleLayerBuilder::settled_window`] keeps successful
//! outcomes around for that long, which also absorbs bursts of identical
//! requests that arrive just after one another. Expired entries are swept on
//! every deduplicated request.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use http::{Method, Request, Response};
use http_body::Body;
use http_body_util::Full;
use tower::{Layer, Service};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::error::{BoxError, SharedError};
use crate::key::KeyExtractor;
use crate::policy::MethodFilter;
use crate::shared::{dispatch, respond, SharedResponse, Ticket};

type Registry = Arc<DashMap<String, InFlight>>;

struct InFlight {
    response: SharedResponse,
    settled_at: Option<Instant>,
}

impl InFlight {
    fn is_live(&self, window: Duration) -> bool {
        match self.settled_at {
            None => true,
            Some(at) => at.elapsed() < window,
        }
    }
}

/// Deduplicating enhancer for Tower HTTP clients.
///
/// Cloning a `ThrottleLayer` is cheap and shares the in-flight registry;
/// separately constructed layers never share state.
#[derive(Clone)]
pub struct ThrottleLayer {
    methods: MethodFilter,
    key_extractor: KeyExtractor,
    settled_window: Duration,
    registry: Registry,
}

/// Builder for configuring [`ThrottleLayer`] instances.
#[derive(Default)]
pub struct ThrottleLayerBuilder {
    methods: MethodFilter,
    key_extractor: KeyExtractor,
    settled_window: Duration,
}

impl ThrottleLayerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets which request methods are deduplicated. Defaults to `GET` and `HEAD`.
    pub fn methods(mut self, methods: MethodFilter) -> Self {
        self.methods = methods;
        self
    }

    pub fn method_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        self.methods = MethodFilter::custom(predicate);
        self
    }

    pub fn key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    /// Keeps a successful outcome shareable for `window` after it settles.
    ///
    /// Defaults to zero: the entry is removed the moment the dispatch settles.
    pub fn settled_window(mut self, window: Duration) -> Self {
        self.settled_window = window;
        self
    }

    pub fn build(self) -> ThrottleLayer {
        ThrottleLayer {
            methods: self.methods,
            key_extractor: self.key_extractor,
            settled_window: self.settled_window,
            registry: Arc::new(DashMap::new()),
        }
    }
}

impl ThrottleLayer {
    /// Builds a throttle layer with default settings.
    pub fn new() -> Self {
        ThrottleLayerBuilder::new().build()
    }

    pub fn builder() -> ThrottleLayerBuilder {
        ThrottleLayerBuilder::new()
    }

    /// Number of live entries: pending dispatches, plus successes still
    /// inside the settled window.
    pub fn in_flight(&self) -> usize {
        prune(&self.registry, self.settled_window);
        self.registry.len()
    }

    /// Whether a live dispatch is registered under `key`.
    pub fn is_pending(&self, key: &str) -> bool {
        self.registry
            .get(key)
            .is_some_and(|entry| entry.is_live(self.settled_window))
    }
}

impl Default for ThrottleLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            methods: self.methods.clone(),
            key_extractor: self.key_extractor.clone(),
            settled_window: self.settled_window,
            registry: self.registry.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ThrottleService<S> {
    inner: S,
    methods: MethodFilter,
    key_extractor: KeyExtractor,
    settled_window: Duration,
    registry: Registry,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ThrottleService<S>
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
        let key = if self.methods.allows(req.method()) {
            self.key_extractor
                .resolve(req.method(), req.uri(), req.extensions())
        } else {
            None
        };

        let Some(key) = key else {
            return Box::pin(async move {
                dispatch(inner, req)
                    .await
                    .map(|entry| entry.into_response())
            });
        };

        let window = self.settled_window;
        prune(&self.registry, window);
        let shared = match self.registry.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().is_live(window) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %key, "throttle_join");
                #[cfg(feature = "metrics")]
                counter!("tower_http_enhancers.throttle.join").increment(1);

                entry.get().response.clone()
            }
            entry => {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %key, "throttle_dispatch");
                #[cfg(feature = "metrics")]
                counter!("tower_http_enhancers.throttle.dispatch").increment(1);

                let ticket = Ticket::new();
                let registry = self.registry.clone();
                let shared = SharedResponse::new(&ticket, {
                    let ticket = ticket.clone();
                    async move {
                        let outcome = dispatch(inner, req).await;
                        settle(&registry, &key, &ticket, window, outcome.is_ok());
                        outcome.map_err(SharedError::new)
                    }
                });

                let in_flight = InFlight {
                    response: shared.clone(),
                    settled_at: None,
                };
                match entry {
                    Entry::Occupied(mut entry) => {
                        entry.insert(in_flight);
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(in_flight);
                    }
                }
                shared
            }
        };

        Box::pin(respond(shared))
    }
}

/// Drops settled entries whose window has passed.
///
/// Pending entries are always live, so only a non-zero window leaves
/// anything to sweep.
fn prune(registry: &DashMap<String, InFlight>, window: Duration) {
    if !window.is_zero() {
        registry.retain(|_, entry| entry.is_live(window));
    }
}

/// Closes the dedup window for a settled dispatch.
///
/// Only touches the entry if it still belongs to `ticket`'s dispatch.
fn settle(
    registry: &DashMap<String, InFlight>,
    key: &str,
    ticket: &Ticket,
    window: Duration,
    ok: bool,
) {
    if ok && !window.is_zero() {
        if let Some(mut entry) = registry.get_mut(key) {
            if ticket.issued(&entry.response) {
                entry.settled_at = Some(Instant::now());
            }
        }
    } else {
        registry.remove_if(key, |_, entry| ticket.issued(&entry.response));
    }
}
