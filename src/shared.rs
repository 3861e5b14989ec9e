//! Shareable dispatch outcomes.
//!
//! The cache and throttle enhancers hand one in-flight dispatch to many
//! callers. A dispatch therefore resolves to a clonable [`CacheEntry`]
//! (a snapshot of the response with its body collected) and is wrapped in a
//! [`SharedResponse`] that every caller can await.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use http::response::Parts;
use http::{HeaderMap, Request, Response, StatusCode, Version};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Service, ServiceExt};

use crate::error::{BoxError, SharedError};

/// Outcome of a shared dispatch.
pub type SharedResult = Result<CacheEntry, SharedError>;

/// Response snapshot handed to every caller of a shared dispatch.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CacheEntry {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    pub(crate) fn from_parts(parts: Parts, body: Bytes) -> Self {
        Self::new(parts.status, parts.version, parts.headers, body)
    }

    /// Converts the entry back into an `http::Response`.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::from(self.body));
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        response
    }
}

/// A dispatch that any number of callers may await.
///
/// Clones refer to the same underlying dispatch; the wrapped service is
/// called once, when the first clone is polled.
#[derive(Clone)]
pub struct SharedResponse {
    ticket: Ticket,
    inner: Shared<BoxFuture<'static, SharedResult>>,
}

impl SharedResponse {
    pub(crate) fn new<F>(ticket: &Ticket, future: F) -> Self
    where
        F: Future<Output = SharedResult> + Send + 'static,
    {
        Self {
            ticket: ticket.clone(),
            inner: future.boxed().shared(),
        }
    }

    /// Wraps an already resolved entry.
    pub fn ready(entry: CacheEntry) -> Self {
        Self::new(&Ticket::new(), futures_util::future::ready(Ok(entry)))
    }

    /// Returns `true` when both handles refer to the same dispatch.
    pub fn ptr_eq(&self, other: &SharedResponse) -> bool {
        Arc::ptr_eq(&self.ticket.0, &other.ticket.0)
    }

    /// Returns the outcome if the dispatch has already settled.
    pub fn peek(&self) -> Option<&SharedResult> {
        self.inner.peek()
    }
}

impl fmt::Debug for SharedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResponse")
            .field("settled", &self.peek().is_some())
            .finish()
    }
}

impl Future for SharedResponse {
    type Output = SharedResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.poll_unpin(cx)
    }
}

/// Identity of one dispatch, used to clear a slot only if it still holds
/// the dispatch that is settling.
#[derive(Clone)]
pub(crate) struct Ticket(Arc<()>);

impl Ticket {
    pub(crate) fn new() -> Self {
        Self(Arc::new(()))
    }

    pub(crate) fn issued(&self, response: &SharedResponse) -> bool {
        Arc::ptr_eq(&self.0, &response.ticket.0)
    }
}

/// Calls `inner` once and collects the response body.
pub(crate) async fn dispatch<S, ReqBody, ResBody>(
    inner: S,
    req: Request<ReqBody>,
) -> Result<CacheEntry, BoxError>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes>,
    ResBody::Error: Into<BoxError>,
{
    let response = inner.oneshot(req).await.map_err(Into::<BoxError>::into)?;
    let (parts, body) = response.into_parts();
    let collected = BodyExt::collect(body).await.map_err(Into::<BoxError>::into)?;
    Ok(CacheEntry::from_parts(parts, collected.to_bytes()))
}

/// Awaits a shared dispatch and hands the caller its own response.
pub(crate) async fn respond(shared: SharedResponse) -> Result<Response<Full<Bytes>>, BoxError> {
    shared
        .await
        .map(CacheEntry::into_response)
        .map_err(BoxError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(body: &'static str) -> CacheEntry {
        CacheEntry::new(
            StatusCode::OK,
            Version::HTTP_11,
            HeaderMap::new(),
            Bytes::from_static(body.as_bytes()),
        )
    }

    #[tokio::test]
    async fn clones_observe_a_single_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let ticket = Ticket::new();
        let shared = SharedResponse::new(&ticket, {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(entry("once"))
            }
        });

        let (a, b) = tokio::join!(shared.clone(), shared.clone());
        assert_eq!(a.unwrap().body, "once");
        assert_eq!(b.unwrap().body, "once");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(shared.peek().is_some());
    }

    #[test]
    fn ticket_identifies_its_own_dispatch() {
        let ticket = Ticket::new();
        let mine = SharedResponse::new(&ticket, async { Ok(entry("a")) });
        let other = SharedResponse::ready(entry("b"));

        assert!(ticket.issued(&mine));
        assert!(!ticket.issued(&other));
        assert!(mine.ptr_eq(&mine.clone()));
        assert!(!mine.ptr_eq(&other));
    }

    #[test]
    fn entry_round_trips_into_response() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        let response = CacheEntry::new(
            StatusCode::CREATED,
            Version::HTTP_2,
            headers,
            Bytes::from_static(b"x"),
        )
        .into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.version(), Version::HTTP_2);
        assert_eq!(response.headers()["content-type"], "text/plain");
    }
}
