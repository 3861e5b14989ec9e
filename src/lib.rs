//! Tower HTTP Enhancers
//! =====================
//!
//! `tower-http-enhancers` adds three independent behaviors to a Tower-based
//! HTTP client, each packaged as a [`tower::Layer`]:
//!
//! - [`CacheLayer`]: serves repeated reads from a pluggable [`CacheLike`]
//!   store. The pending dispatch itself is cached, so concurrent callers share
//!   it. Failures and non-`2xx` responses are never cached.
//! - [`ThrottleLayer`]: collapses concurrent identical requests into a
//!   single dispatch whose outcome every caller receives.
//! - [`RetryLayer`]: re-dispatches failed requests up to a limit, with an
//!   optional predicate and backoff.
//!
//! Requests are identified by their method and URL with sorted query pairs
//! (see [`url::canonical_key`]). Layers compose in whatever order the caller
//! stacks them:
//!
//! ```no_run
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_http_enhancers::prelude::*;
//!
//! # async fn run() -> Result<(), tower_http_enhancers::BoxError> {
//! let mut client = ServiceBuilder::new()
//!     .layer(CacheLayer::new(InMemoryCache::default()))
//!     .layer(ThrottleLayer::new())
//!     .layer(RetryLayer::builder().max_attempts(3).build()?)
//!     .service(tower::service_fn(|_req: http::Request<()>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(
//!             http_body_util::Full::<bytes::Bytes>::from("ok"),
//!         ))
//!     }));
//!
//! let response = client
//!     .ready()
//!     .await?
//!     .call(http::Request::get("/users?page=2&sort=name").body(())?)
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```
//!
//! ## Status
//! The public API is not yet stabilized.

pub mod backend;
pub mod cache;
pub mod error;
pub mod extensions;
pub mod key;
pub mod policy;
pub mod prelude;
pub mod retry;
pub mod shared;
pub mod throttle;
pub mod url;

pub use backend::memory::InMemoryCache;
pub use backend::{CacheLike, FnCache, FnCacheBuilder};
pub use cache::{CacheLayer, CacheLayerBuilder, CacheService};
pub use error::{find_error, BoxError, ConfigError, SharedError};
pub use extensions::{
    CacheFlag, DynCache, EnhancerRequestExt, ForceUpdate, RequestKey, RetryAttempt,
    RetryAttempts,
};
pub use key::KeyExtractor;
pub use policy::{CachePolicy, MethodFilter};
pub use retry::{Backoff, RetryLayer, RetryLayerBuilder, RetryPolicy, RetryService};
pub use shared::{CacheEntry, SharedResponse};
pub use throttle::{ThrottleLayer, ThrottleLayerBuilder, ThrottleService};
