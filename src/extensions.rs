//! Per-request configuration read by the enhancers.
//!
//! Flags travel in the request's [`http::Extensions`], so they pass through
//! every layer untouched and each enhancer picks up the ones it knows.
//! [`EnhancerRequestExt`] adds shorthand setters to [`http::request::Builder`]:
//!
//! ```
//! use tower_http_enhancers::extensions::{EnhancerRequestExt, ForceUpdate};
//!
//! let request = http::Request::builder()
//!     .uri("/users?page=2")
//!     .force_update()
//!     .retry_attempts(5)
//!     .body(())
//!     .unwrap();
//!
//! assert!(request.extensions().get::<ForceUpdate>().is_some());
//! ```

use std::fmt;
use std::sync::Arc;

use http::request::Builder;

use crate::backend::CacheLike;
use crate::shared::SharedResponse;

/// Type-erased cache usable by the cache enhancer.
pub type DynCache = Arc<dyn CacheLike<SharedResponse>>;

/// Enables, disables or redirects caching for a single request.
#[derive(Clone)]
pub enum CacheFlag {
    Enabled,
    Disabled,
    /// Use this cache instead of the layer's own for the request.
    Custom(DynCache),
}

impl fmt::Debug for CacheFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheFlag::Enabled => f.write_str("Enabled"),
            CacheFlag::Disabled => f.write_str("Disabled"),
            CacheFlag::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Skips the cache read and refreshes the stored entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForceUpdate;

/// Explicit cache and throttle key, used instead of the derived one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey(pub String);

/// Overrides the retry enhancer's maximum number of attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryAttempts(pub u32);

/// Zero-based attempt number, set by the retry enhancer on every dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryAttempt(pub u32);

/// Shorthand setters for enhancer flags on a request builder.
pub trait EnhancerRequestExt {
    fn force_update(self) -> Self;
    fn cache(self, flag: CacheFlag) -> Self;
    fn no_cache(self) -> Self;
    fn request_key(self, key: impl Into<String>) -> Self;
    fn retry_attempts(self, attempts: u32) -> Self;
}

impl EnhancerRequestExt for Builder {
    fn force_update(self) -> Self {
        self.extension(ForceUpdate)
    }

    fn cache(self, flag: CacheFlag) -> Self {
        self.extension(flag)
    }

    fn no_cache(self) -> Self {
        self.extension(CacheFlag::Disabled)
    }

    fn request_key(self, key: impl Into<String>) -> Self {
        self.extension(RequestKey(key.into()))
    }

    fn retry_attempts(self, attempts: u32) -> Self {
        self.extension(RetryAttempts(attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    #[test]
    fn builder_sets_each_flag() {
        let request = Request::builder()
            .uri("/a")
            .no_cache()
            .request_key("custom")
            .retry_attempts(4)
            .body(())
            .unwrap();

        assert!(matches!(
            request.extensions().get::<CacheFlag>(),
            Some(CacheFlag::Disabled)
        ));
        assert_eq!(
            request.extensions().get::<RequestKey>(),
            Some(&RequestKey("custom".into()))
        );
        assert_eq!(
            request.extensions().get::<RetryAttempts>(),
            Some(&RetryAttempts(4))
        );
        assert!(request.extensions().get::<ForceUpdate>().is_none());
    }
}
