//! Response cache composed with the timeout transport.

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::future::join_all;
use tower::Layer;

use hardened_http::cache::{CacheAddress, CacheLayer, CacheStore, MemcacheStore, MemoryStore, X_FROM_CACHE};
use hardened_http::client::build_cache_transport_at;
use hardened_http::config::TimeoutConfig;
use hardened_http::{ClientConfig, Credential, Error, HttpClient, TimeoutTransport};

fn transport() -> TimeoutTransport {
    TimeoutTransport::new(
        &TimeoutConfig {
            dial_ms: 1_000,
            request_ms: 400,
        },
        Credential::new("s3cret").unwrap(),
    )
}

#[tokio::test]
async fn test_repeat_request_is_served_from_cache() {
    let (addr, count) = common::start_counting_backend("max-age=300").await;
    let timeouts = transport();
    let client = HttpClient::new(CacheLayer::new(MemoryStore::new()).layer(timeouts.clone()));
    let url = format!("http://{}/repos/a/b", addr);

    let first = client.get(&url).await.unwrap();
    assert!(first.headers().get(X_FROM_CACHE).is_none());

    let second = client.get(&url).await.unwrap();
    assert_eq!(second.headers().get(X_FROM_CACHE).unwrap(), "1");
    assert_eq!(second.body(), first.body());

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(timeouts.stats().completed, 1);
}

#[tokio::test]
async fn test_uncacheable_response_reaches_network_each_time() {
    let (addr, count) = common::start_counting_backend("no-store").await;
    let client = HttpClient::new(CacheLayer::new(MemoryStore::new()).layer(transport()));
    let url = format!("http://{}/", addr);

    client.get(&url).await.unwrap();
    let second = client.get(&url).await.unwrap();

    assert!(second.headers().get(X_FROM_CACHE).is_none());
    assert_eq!(second.body(), &Bytes::from_static(b"response 2"));
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cache_miss_inherits_request_timeout() {
    let addr = common::start_stalled_body_backend().await;
    let store = MemoryStore::new();
    let client = HttpClient::new(CacheLayer::new(store.clone()).layer(transport()));

    let err = client.get(&format!("http://{}/", addr)).await.unwrap_err();

    assert!(matches!(err, Error::RequestCanceled { .. }), "unexpected error: {}", err);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_memcache_store_against_server() {
    let (addr, data) = common::start_fake_memcache().await;
    let store = MemcacheStore::new(addr.to_string());

    assert_eq!(store.get("httpcache:missing").await.unwrap(), None);

    store.set("httpcache:k", b"value\r\nwith newline").await.unwrap();
    assert_eq!(
        store.get("httpcache:k").await.unwrap().as_deref(),
        Some(&b"value\r\nwith newline"[..])
    );
    assert!(data.lock().unwrap().contains_key("httpcache:k"));

    store.delete("httpcache:k").await.unwrap();
    store.delete("httpcache:k").await.unwrap();
    assert_eq!(store.get("httpcache:k").await.unwrap(), None);

    // Sequential operations reuse one pooled connection.
    assert_eq!(store.idle_connections(), 1);
}

#[tokio::test]
async fn test_hung_memcache_operations_run_concurrently() {
    let cache_addr = common::start_mute_backend().await;
    let store = MemcacheStore::new(cache_addr.to_string()).with_op_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let results = join_all((0..10).map(|i| {
        let store = &store;
        async move { store.get(&format!("httpcache:{}", i)).await }
    }))
    .await;

    assert!(results.iter().all(|r| r.is_err()));
    assert!(started.elapsed() < Duration::from_millis(600), "elapsed {:?}", started.elapsed());
    assert_eq!(store.idle_connections(), 0);
}

#[tokio::test]
async fn test_hung_memcache_does_not_queue_requests() {
    let cache_addr = common::start_mute_backend().await;
    let (addr, count) = common::start_counting_backend("max-age=300").await;

    let store = MemcacheStore::new(cache_addr.to_string()).with_op_timeout(Duration::from_millis(200));
    let client = HttpClient::new(CacheLayer::new(store).layer(transport()));
    let url = format!("http://{}/", addr);

    let started = Instant::now();
    let results = join_all((0..10).map(|_| client.get(&url))).await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(|r| r.as_ref().is_ok_and(|resp| resp.status() == 200)));
    assert_eq!(count.load(Ordering::SeqCst), 10);
    // One lookup and one save timeout per request, overlapping across requests.
    assert!(elapsed < Duration::from_secs(1), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn test_memcache_backed_client_serves_hits() {
    let (cache_addr, data) = common::start_fake_memcache().await;
    let (addr, count) = common::start_counting_backend("max-age=300").await;

    let address = CacheAddress {
        host: cache_addr.ip().to_string(),
        port: cache_addr.port().to_string(),
    };
    let layer = build_cache_transport_at(&ClientConfig::default(), &address);
    let client = HttpClient::new(layer.layer(transport()));
    let url = format!("http://{}/users/octocat", addr);

    client.get(&url).await.unwrap();
    let second = client.get(&url).await.unwrap();

    assert_eq!(second.headers().get(X_FROM_CACHE).unwrap(), "1");
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(data.lock().unwrap().keys().all(|k| k.starts_with("httpcache:")));
}

#[tokio::test]
async fn test_unreachable_memcache_degrades_to_miss() {
    let cache_addr = common::closed_port().await;
    let (addr, count) = common::start_counting_backend("max-age=300").await;

    let store = MemcacheStore::new(cache_addr.to_string()).with_op_timeout(Duration::from_millis(200));
    let client = HttpClient::new(CacheLayer::new(store).layer(transport()));
    let url = format!("http://{}/", addr);

    assert_eq!(client.get(&url).await.unwrap().status(), 200);
    assert_eq!(client.get(&url).await.unwrap().status(), 200);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}
