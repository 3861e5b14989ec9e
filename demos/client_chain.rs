//! Stacks the cache, throttle and retry enhancers around a simulated origin.
//!
//! Run with:
//! RUST_LOG=tower_http_enhancers=debug cargo run --example client_chain

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http_enhancers::prelude::*;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    #[cfg(feature = "tracing")]
    {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "tower_http_enhancers=debug".into()),
            )
            .init();
    }

    let origin_calls = Arc::new(AtomicUsize::new(0));
    let origin = tower::service_fn({
        let calls = origin_calls.clone();
        move |req: Request<()>| {
            let calls = calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                // Every third call drops the connection.
                if call % 3 == 0 {
                    return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
                }
                let body = format!("{} served by call #{}", req.uri(), call + 1);
                Ok(Response::new(Full::<Bytes>::from(body)))
            }
        }
    });

    let cache = CacheLayer::builder(InMemoryCache::default())
        .key_extractor(KeyExtractor::canonical())
        .build();
    let retry = RetryLayer::builder()
        .max_attempts(3)
        .retry_if(|err, _| {
            find_error::<io::Error>(err)
                .is_some_and(|err| err.kind() == io::ErrorKind::ConnectionReset)
        })
        .backoff(Backoff::exponential(
            Duration::from_millis(20),
            2.0,
            Duration::from_millis(200),
        ))
        .build()?;

    let mut client = ServiceBuilder::new()
        .layer(cache.clone())
        .layer(ThrottleLayer::new())
        .layer(retry)
        .service(origin);

    let mut params = QueryParams::new();
    params.insert("page".into(), 2.into());
    params.insert("sort".into(), "name".into());
    params.insert("archived".into(), serde_json::Value::Null);

    let url = build_url("/users", &params);
    println!("built url: {url}");

    println!("\n1. Concurrent identical reads");
    let first = client.ready().await?.call(Request::get(&url).body(())?);
    let second = client
        .ready()
        .await?
        .call(Request::get("/users?sort=name&page=2").body(())?);
    let (first, second) = tokio::join!(first, second);
    println!("   first:  {}", body_text(first?).await?);
    println!("   second: {}", body_text(second?).await?);

    println!("\n2. Cached read");
    let cached = client.ready().await?.call(Request::get(&url).body(())?).await?;
    println!("   {}", body_text(cached).await?);

    println!("\n3. Forced refresh");
    let forced = client
        .ready()
        .await?
        .call(Request::get(&url).force_update().body(())?)
        .await?;
    println!("   {}", body_text(forced).await?);

    println!("\n4. Uncached read");
    let fresh = client
        .ready()
        .await?
        .call(Request::get(&url).no_cache().body(())?)
        .await?;
    println!("   {}", body_text(fresh).await?);

    println!("\norigin calls: {}", origin_calls.load(Ordering::SeqCst));
    Ok(())
}

async fn body_text(response: Response<Full<Bytes>>) -> Result<String, BoxError> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
