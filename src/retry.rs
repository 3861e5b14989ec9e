//! Retrying failed dispatches.
//!
//! Each attempt is dispatched with a fresh clone of the request and carries
//! its zero-based [`RetryAttempt`] number.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use http::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tower::{Layer, Service, ServiceExt};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::error::{BoxError, ConfigError};
use crate::extensions::{RetryAttempt, RetryAttempts};

/// Default number of dispatches per request, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Type alias for the retry decision predicate
type RetryPredicateFn = Arc<dyn Fn(&BoxError, u32) -> bool + Send + Sync>;

type StatusPredicateFn = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

/// Delay applied between two attempts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    /// Wait the same duration before every retry.
    Fixed { delay: Duration },
    /// Wait `base * factor^(failures - 1)`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    pub fn exponential(base: Duration, factor: f64, max: Duration) -> Self {
        Backoff::Exponential { base, factor, max }
    }

    /// Delay to wait after the `failures`-th failed attempt.
    pub fn delay(&self, failures: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential { base, factor, max } => {
                let exponent = failures.saturating_sub(1) as i32;
                let scaled = base.as_secs_f64() * factor.max(1.0).powi(exponent);
                if !scaled.is_finite() || scaled >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

/// Retry configuration shared by every request passing through a
/// [`RetryLayer`].
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    predicate: Option<RetryPredicateFn>,
    retry_status: Option<StatusPredicateFn>,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            predicate: None,
            retry_status: None,
            backoff: Backoff::None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("predicate", &self.predicate.is_some())
            .field("retry_status", &self.retry_status.is_some())
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Whether the `failures`-th failure may be retried, attempts permitting.
    pub fn should_retry(&self, err: &BoxError, failures: u32) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(err, failures))
    }

    /// Whether a response with `status` should be dispatched again.
    pub fn retries_status(&self, status: StatusCode) -> bool {
        self.retry_status
            .as_ref()
            .is_some_and(|predicate| predicate(status))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

/// Retrying enhancer for Tower HTTP clients.
///
/// Failed dispatches are repeated until one succeeds, the attempt budget is
/// spent, or the configured predicate declines. The caller then receives the
/// last error unchanged. Requests are cloned for every attempt, so the
/// request body must be `Clone`.
#[derive(Clone, Debug, Default)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

/// Builder for configuring [`RetryLayer`] instances.
#[derive(Default)]
pub struct RetryLayerBuilder {
    policy: RetryPolicy,
}

impl RetryLayerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of dispatches per request, the first one included.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Only retries failures for which `predicate(err, failures)` holds.
    ///
    /// `failures` counts the failed attempts so far, starting at 1.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BoxError, u32) -> bool + Send + Sync + 'static,
    {
        self.policy.predicate = Some(Arc::new(predicate));
        self
    }

    /// Also retries successful dispatches whose status matches `predicate`.
    ///
    /// When the attempts run out the last such response is returned as is.
    pub fn retry_on_status<F>(mut self, predicate: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.policy.retry_status = Some(Arc::new(predicate));
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.policy.backoff = backoff;
        self
    }

    pub fn build(self) -> Result<RetryLayer, ConfigError> {
        self.policy.validate()?;
        Ok(RetryLayer {
            policy: self.policy,
        })
    }
}

impl RetryLayer {
    /// Builds a retry layer allowing [`DEFAULT_MAX_ATTEMPTS`] dispatches.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RetryLayerBuilder {
        RetryLayerBuilder::new()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: self.policy.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RetryService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Clone + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let inner = self.inner.clone();
        let policy = self.policy.clone();
        let max_attempts = req
            .extensions()
            .get::<RetryAttempts>()
            .map(|RetryAttempts(attempts)| (*attempts).max(1))
            .unwrap_or(policy.max_attempts);

        Box::pin(async move {
            let mut failures: u32 = 0;
            loop {
                let mut attempt = clone_request(&req);
                attempt.extensions_mut().insert(RetryAttempt(failures));

                let err: BoxError = match inner.clone().oneshot(attempt).await {
                    Ok(response) => {
                        let status = response.status();
                        if failures + 1 >= max_attempts || !policy.retries_status(status) {
                            return Ok(response);
                        }
                        drop(response);
                        failures += 1;
                        #[cfg(feature = "tracing")]
                        tracing::debug!(failures, status = %status, "retry_status");
                        sleep_backoff(&policy, failures).await;
                        continue;
                    }
                    Err(err) => err.into(),
                };
                failures += 1;

                if failures >= max_attempts || !policy.should_retry(&err, failures) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(failures, max_attempts, "retry_give_up");
                    #[cfg(feature = "metrics")]
                    counter!("tower_http_enhancers.retry.exhausted").increment(1);
                    return Err(err);
                }

                sleep_backoff(&policy, failures).await;
            }
        })
    }
}

async fn sleep_backoff(policy: &RetryPolicy, failures: u32) {
    let delay = policy.backoff.delay(failures);
    #[cfg(feature = "tracing")]
    tracing::debug!(failures, delay_ms = delay.as_millis() as u64, "retry_attempt");
    #[cfg(feature = "metrics")]
    counter!("tower_http_enhancers.retry.attempt").increment(1);

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Copies a request so it can be dispatched once more.
pub fn clone_request<B: Clone>(req: &Request<B>) -> Request<B> {
    let mut clone = Request::new(req.body().clone());
    *clone.method_mut() = req.method().clone();
    *clone.uri_mut() = req.uri().clone();
    *clone.version_mut() = req.version();
    *clone.headers_mut() = req.headers().clone();
    *clone.extensions_mut() = req.extensions().clone();
    clone
}
