use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use tokio::time::sleep;
use tower::service_fn;
use tower::util::BoxCloneService;
use tower::{Layer, Service, ServiceExt};
use tower_http_enhancers::prelude::*;

type Body = Full<Bytes>;

/// Handler that answers with its call count after `delay`.
fn slow_handler(
    counter: Arc<AtomicUsize>,
    delay: Duration,
) -> BoxCloneService<Request<()>, Response<Body>, io::Error> {
    BoxCloneService::new(service_fn(move |_req: Request<()>| {
        let counter = counter.clone();
        async move {
            let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
            sleep(delay).await;
            Ok::<_, io::Error>(Response::new(Full::from(value.to_string())))
        }
    }))
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collected")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("body utf-8")
}

fn request(method: Method, uri: &str) -> Request<()> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(())
        .expect("valid request")
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_dispatch() {
    let counter = Arc::new(AtomicUsize::new(0));
    let layer = ThrottleLayer::new();
    let mut service = layer.layer(slow_handler(counter.clone(), Duration::from_millis(30)));

    let first = service
        .ready()
        .await
        .expect("service ready")
        .call(request(Method::GET, "/users?b=2&a=1"));
    let second = service
        .ready()
        .await
        .expect("service ready")
        .call(request(Method::GET, "/users?a=1&b=2"));
    assert_eq!(layer.in_flight(), 1);

    let (first, second) = tokio::join!(first, second);
    assert_eq!(body_text(first.unwrap()).await, "1");
    assert_eq!(body_text(second.unwrap()).await, "1");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(layer.in_flight(), 0, "entry cleared once settled");

    let third = service
        .ready()
        .await
        .unwrap()
        .call(request(Method::GET, "/users?a=1&b=2"))
        .await
        .unwrap();
    assert_eq!(body_text(third).await, "2");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn shared_failure_reaches_every_caller_and_is_cleared() {
    let calls = Arc::new(AtomicUsize::new(0));
    let layer = ThrottleLayer::new();
    let mut service = layer.layer(service_fn({
        let calls = calls.clone();
        move |_req: Request<()>| {
            let calls = calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                if call == 0 {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
                } else {
                    Ok(Response::new(Full::<Bytes>::from("ok")))
                }
            }
        }
    }));

    let first = service.ready().await.unwrap().call(request(Method::GET, "/x"));
    let second = service.ready().await.unwrap().call(request(Method::GET, "/x"));
    let (first, second) = tokio::join!(first, second);

    for outcome in [first, second] {
        let err = outcome.expect_err("dispatch failed");
        let io_err = find_error::<io::Error>(&err).expect("original error reachable");
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!layer.is_pending("GET /x"));

    let retried = service
        .ready()
        .await
        .unwrap()
        .call(request(Method::GET, "/x"))
        .await
        .unwrap();
    assert_eq!(body_text(retried).await, "ok");
}

#[tokio::test]
async fn writes_are_not_deduplicated() {
    let counter = Arc::new(AtomicUsize::new(0));
    let layer = ThrottleLayer::new();
    let mut service = layer.layer(slow_handler(counter.clone(), Duration::from_millis(10)));

    let first = service.ready().await.unwrap().call(request(Method::POST, "/items"));
    let second = service.ready().await.unwrap().call(request(Method::POST, "/items"));
    assert_eq!(layer.in_flight(), 0);

    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn custom_method_filter_includes_post() {
    let counter = Arc::new(AtomicUsize::new(0));
    let layer = ThrottleLayer::builder()
        .methods(MethodFilter::only([Method::GET, Method::POST]))
        .build();
    let mut service = layer.layer(slow_handler(counter.clone(), Duration::from_millis(20)));

    let first = service.ready().await.unwrap().call(request(Method::POST, "/q"));
    let second = service.ready().await.unwrap().call(request(Method::POST, "/q"));
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn settled_window_reuses_recent_success() {
    let counter = Arc::new(AtomicUsize::new(0));
    let layer = ThrottleLayer::builder()
        .settled_window(Duration::from_millis(80))
        .build();
    let mut service = layer.layer(slow_handler(counter.clone(), Duration::ZERO));

    service
        .ready()
        .await
        .unwrap()
        .call(request(Method::GET, "/burst"))
        .await
        .unwrap();
    let within = service
        .ready()
        .await
        .unwrap()
        .call(request(Method::GET, "/burst"))
        .await
        .unwrap();
    assert_eq!(body_text(within).await, "1");
    assert!(layer.is_pending("GET /burst"));

    sleep(Duration::from_millis(120)).await;
    assert!(!layer.is_pending("GET /burst"));

    let after = service
        .ready()
        .await
        .unwrap()
        .call(request(Method::GET, "/burst"))
        .await
        .unwrap();
    assert_eq!(body_text(after).await, "2");
}

#[tokio::test]
async fn separate_layers_do_not_share_registry() {
    let counter = Arc::new(AtomicUsize::new(0));
    let handler = slow_handler(counter.clone(), Duration::from_millis(20));
    let mut a = ThrottleLayer::new().layer(handler.clone());
    let mut b = ThrottleLayer::new().layer(handler);

    let first = a.ready().await.unwrap().call(request(Method::GET, "/same"));
    let second = b.ready().await.unwrap().call(request(Method::GET, "/same"));
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expired_windows_do_not_accumulate() {
    let counter = Arc::new(AtomicUsize::new(0));
    let layer = ThrottleLayer::builder()
        .settled_window(Duration::from_millis(5))
        .build();
    let mut service = layer.layer(slow_handler(counter.clone(), Duration::ZERO));

    for page in 0..50 {
        service
            .ready()
            .await
            .unwrap()
            .call(request(Method::GET, &format!("/pages/{page}")))
            .await
            .unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 50);

    sleep(Duration::from_millis(40)).await;
    assert_eq!(layer.in_flight(), 0, "expired entries are swept");

    service
        .ready()
        .await
        .unwrap()
        .call(request(Method::GET, "/pages/0"))
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 51, "expired entry is not replayed");
}
