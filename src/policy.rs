//! Cache policy: eligible methods, cacheable statuses and the request
//! `Cache-Control` directives that are honored.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use http::header::{CACHE_CONTROL, PRAGMA};
use http::{HeaderMap, Method, StatusCode, Uri};

/// Type alias for the method predicate function
type MethodPredicateFn = Arc<dyn Fn(&Method) -> bool + Send + Sync>;

/// Type alias for the force-update predicate
type ForceUpdateFn = Arc<dyn Fn(&Method, &Uri, &HeaderMap) -> bool + Send + Sync>;

/// Decides which request methods an enhancer acts on.
///
/// The default accepts the idempotent read methods, `GET` and `HEAD`.
#[derive(Clone, Default)]
pub struct MethodFilter {
    predicate: Option<MethodPredicateFn>,
}

impl MethodFilter {
    /// Accepts only `GET` and `HEAD`.
    pub fn safe_reads() -> Self {
        Self::default()
    }

    /// Accepts exactly the given methods.
    pub fn only(methods: impl IntoIterator<Item = Method>) -> Self {
        let allowed: HashSet<Method> = methods.into_iter().collect();
        Self::custom(move |method| allowed.contains(method))
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn allows(&self, method: &Method) -> bool {
        if let Some(predicate) = &self.predicate {
            predicate(method)
        } else {
            matches!(method, &Method::GET | &Method::HEAD)
        }
    }
}

impl fmt::Debug for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodFilter")
            .field("custom", &self.predicate.is_some())
            .finish()
    }
}

/// Runtime policy of the cache enhancer.
///
/// Policies are cheap to clone and immutable; the `with_*` helpers return
/// new copies with the requested change.
#[derive(Clone)]
pub struct CachePolicy {
    methods: MethodFilter,
    enabled_by_default: bool,
    respect_cache_control: bool,
    force_update: Option<ForceUpdateFn>,
    cache_statuses: Option<HashSet<u16>>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            methods: MethodFilter::default(),
            enabled_by_default: true,
            respect_cache_control: true,
            force_update: None,
            cache_statuses: None,
        }
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("methods", &self.methods)
            .field("enabled_by_default", &self.enabled_by_default)
            .field("respect_cache_control", &self.respect_cache_control)
            .field("force_update", &self.force_update.is_some())
            .field("cache_statuses", &self.cache_statuses)
            .finish()
    }
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Determines whether the request method is cacheable.
    pub fn should_cache_method(&self, method: &Method) -> bool {
        self.methods.allows(method)
    }

    /// Whether requests without a [`CacheFlag`](crate::extensions::CacheFlag) are cached.
    pub fn enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    /// Returns whether `Cache-Control`/`Pragma` headers on requests are honored.
    pub fn respect_cache_control(&self) -> bool {
        self.respect_cache_control
    }

    /// Whether the request must skip the cache read and refresh the entry.
    pub fn forces_update(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> bool {
        if self.respect_cache_control && demands_revalidation(headers) {
            return true;
        }
        self.force_update
            .as_ref()
            .is_some_and(|predicate| predicate(method, uri, headers))
    }

    /// Whether a response with `status` may be kept in the cache.
    ///
    /// Without an explicit allowlist only `2xx` responses are kept.
    pub fn should_cache_status(&self, status: StatusCode) -> bool {
        match &self.cache_statuses {
            Some(statuses) => statuses.contains(&status.as_u16()),
            None => status.is_success(),
        }
    }

    /// Whether the request asks not to be served from or stored in a cache.
    pub fn forbids_store(&self, headers: &HeaderMap) -> bool {
        self.respect_cache_control && forbids_store(headers)
    }

    pub fn with_methods(mut self, methods: MethodFilter) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_method_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        self.methods = MethodFilter::custom(predicate);
        self
    }

    pub fn with_enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    pub fn with_respect_cache_control(mut self, enabled: bool) -> Self {
        self.respect_cache_control = enabled;
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.cache_statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn with_force_update<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Method, &Uri, &HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.force_update = Some(Arc::new(predicate));
        self
    }
}

fn directives(headers: &HeaderMap) -> impl Iterator<Item = String> + '_ {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
}

/// `Cache-Control: no-store` on a request.
pub fn forbids_store(headers: &HeaderMap) -> bool {
    directives(headers).any(|token| token == "no-store")
}

/// `Cache-Control: no-cache`, `max-age=0` or `Pragma: no-cache` on a request.
pub fn demands_revalidation(headers: &HeaderMap) -> bool {
    directives(headers).any(|token| matches!(token.as_str(), "no-cache" | "max-age=0"))
        || headers
            .get(PRAGMA)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase().contains("no-cache"))
            .unwrap_or(false)
}
