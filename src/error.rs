use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by every enhancer service.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors raised while configuring an enhancer.
///
/// These are returned from builders and never surface at request time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache is missing the `{0}` capability")]
    MissingCapability(&'static str),

    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Failure of a dispatch observed by more than one caller.
///
/// The cache and throttle enhancers hand the same outcome to every caller
/// attached to a dispatch, so the original error is kept behind an `Arc`.
/// `Display` and `source` are forwarded to it; use [`SharedError::downcast_ref`]
/// or [`find_error`] to get at the concrete type.
#[derive(Clone)]
pub struct SharedError {
    inner: Arc<dyn StdError + Send + Sync>,
}

impl SharedError {
    /// Wraps `err`, reusing it directly when it is already shared.
    pub fn new(err: BoxError) -> Self {
        match err.downcast::<SharedError>() {
            Ok(shared) => *shared,
            Err(err) => Self {
                inner: Arc::from(err),
            },
        }
    }

    /// Returns the error produced by the wrapped dispatch.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        let mut current: &(dyn StdError + Send + Sync + 'static) = &*self.inner;
        loop {
            if let Some(found) = current.downcast_ref::<T>() {
                return Some(found);
            }
            current = &*current.downcast_ref::<SharedError>()?.inner;
        }
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl StdError for SharedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Looks up an error of type `T` in `err`, seeing through [`SharedError`].
///
/// Handy inside retry predicates, which may sit above a cache or throttle
/// layer and therefore receive shared failures.
pub fn find_error<T: StdError + 'static>(err: &BoxError) -> Option<&T> {
    if let Some(found) = err.downcast_ref::<T>() {
        return Some(found);
    }
    err.downcast_ref::<SharedError>()
        .and_then(|shared| shared.downcast_ref::<T>())
}
