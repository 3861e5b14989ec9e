//! Request keys shared by the cache and throttle enhancers.

use std::fmt;
use std::sync::Arc;

use http::{Extensions, Method, Uri};

use crate::extensions::RequestKey;
use crate::url::canonical_key;

/// Type alias for the key extractor function
type KeyExtractorFn = Arc<dyn Fn(&Method, &Uri) -> Option<String> + Send + Sync>;

/// Strategy used to turn requests into cache and throttle keys.
///
/// The default, [`KeyExtractor::canonical`], keys requests on their method
/// and URL with the query pairs sorted. An extractor may return `None` to
/// leave a request alone, in which case the enhancer passes it straight
/// through.
#[derive(Clone)]
pub struct KeyExtractor {
    inner: KeyExtractorFn,
}

impl KeyExtractor {
    /// Keys on `method + URL` with sorted query pairs.
    pub fn canonical() -> Self {
        Self {
            inner: Arc::new(|method: &Method, uri: &Uri| Some(canonical_key(method, uri))),
        }
    }

    /// Keys on `method + URL` exactly as written, without sorting.
    pub fn path_and_query() -> Self {
        Self {
            inner: Arc::new(|method: &Method, uri: &Uri| Some(format!("{} {}", method, uri))),
        }
    }

    /// Keys on `method + path`, ignoring the query string.
    pub fn path() -> Self {
        Self {
            inner: Arc::new(|method: &Method, uri: &Uri| Some(format!("{} {}", method, uri.path()))),
        }
    }

    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&Method, &Uri) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(func),
        }
    }

    /// Extracts a key from the provided request parts.
    pub fn extract(&self, method: &Method, uri: &Uri) -> Option<String> {
        (self.inner)(method, uri)
    }

    /// Resolves the key for a request. An explicit [`RequestKey`] wins.
    pub fn resolve(&self, method: &Method, uri: &Uri, extensions: &Extensions) -> Option<String> {
        match extensions.get::<RequestKey>() {
            Some(RequestKey(key)) => Some(key.clone()),
            None => self.extract(method, uri),
        }
    }
}

impl Default for KeyExtractor {
    fn default() -> Self {
        Self::canonical()
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyExtractor").finish_non_exhaustive()
    }
}
