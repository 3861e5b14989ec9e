//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use tower_http_enhancers::prelude::*;
//!
//! let cache = CacheLayer::builder(InMemoryCache::default())
//!     .enabled_by_default(true)
//!     .build();
//! let throttle = ThrottleLayer::new();
//! # drop((cache, throttle));
//! ```

pub use crate::backend::memory::InMemoryCache;
pub use crate::backend::{CacheLike, FnCache};
pub use crate::cache::{CacheLayer, CacheLayerBuilder};
pub use crate::error::{find_error, BoxError, ConfigError, SharedError};
pub use crate::extensions::{
    CacheFlag, EnhancerRequestExt, ForceUpdate, RequestKey, RetryAttempt, RetryAttempts,
};
pub use crate::key::KeyExtractor;
pub use crate::policy::{CachePolicy, MethodFilter};
pub use crate::retry::{Backoff, RetryLayer, RetryLayerBuilder};
pub use crate::shared::{CacheEntry, SharedResponse};
pub use crate::throttle::{ThrottleLayer, ThrottleLayerBuilder};
pub use crate::url::{build_sorted_url, build_url, canonical_key, sort_query, QueryParams};
