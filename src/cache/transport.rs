//! Caching transport.
//!
//! # Responsibilities
//! - Serve fresh cached responses without touching the network
//! - Revalidate stale responses with conditional requests
//! - Store cacheable responses; invalidate on unsafe requests
//!
//! # Design Decisions
//! - Composed in front of another transport as a `tower::Layer`
//! - Cache misses and revalidations flow through the wrapped transport,
//!   so they inherit its timeouts
//! - The backend is shared and opaque; no locking happens here

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, RANGE};
use http::{Method, Request, Response, StatusCode};
use tower::{Layer, Service};

use crate::cache::entry::{is_storable, CacheControl, CachedResponse, Freshness};
use crate::cache::store::CacheStore;
use crate::observability::metrics;
use crate::transport::Error;

/// Header set to `1` on responses served from the cache.
pub const X_FROM_CACHE: &str = "x-from-cache";

/// Wraps a transport with a shared response cache.
#[derive(Debug)]
pub struct CacheLayer<C> {
    store: Arc<C>,
}

impl<C> CacheLayer<C> {
    pub fn new(store: C) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<C>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }
}

impl<C> Clone for CacheLayer<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S, C> Layer<S> for CacheLayer<C> {
    type Service = CacheTransport<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheTransport {
            inner,
            store: Arc::clone(&self.store),
        }
    }
}

/// A transport that answers from the cache when it can and delegates otherwise.
#[derive(Debug)]
pub struct CacheTransport<S, C> {
    inner: S,
    store: Arc<C>,
}

impl<S, C> CacheTransport<S, C> {
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }
}

impl<S: Clone, C> Clone for CacheTransport<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S, C> Service<Request<Bytes>> for CacheTransport<S, C>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
    C: CacheStore,
{
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Bytes>, Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        // Use the instance that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(round_trip(inner, Arc::clone(&self.store), request))
    }
}

async fn round_trip<S, C>(
    mut inner: S,
    store: Arc<C>,
    mut request: Request<Bytes>,
) -> Result<Response<Bytes>, Error>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error>,
    C: CacheStore,
{
    let key = store_key(&request);

    if !is_cacheable(&request) {
        metrics::record_cache_lookup("bypass");
        if !request.method().is_safe() {
            // Unsafe methods invalidate both their own entry and the URL's GET entry.
            for stale in [key, hashed_key(&request.uri().to_string())] {
                if let Err(e) = store.delete(&stale).await {
                    tracing::warn!(error = %e, "Cache invalidation failed");
                }
            }
        }
        return inner.call(request).await;
    }

    let request_cc = CacheControl::from_headers(request.headers());
    let now = unix_now();
    let mut cached = lookup(store.as_ref(), &key, request.headers()).await;

    let fresh = cached
        .as_ref()
        .filter(|entry| entry.freshness(&request_cc, now) == Freshness::Fresh)
        .map(CachedResponse::to_response);
    match fresh {
        Some(Ok(response)) => {
            metrics::record_cache_lookup("hit");
            tracing::debug!(url = %request.uri(), "Serving fresh cached response");
            return Ok(mark_from_cache(response));
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Discarding unreadable cache entry");
            cached = None;
        }
        None => {}
    }

    let revalidating = match &cached {
        Some(entry) => add_validators(entry, request.headers_mut()),
        None if request_cc.only_if_cached => {
            metrics::record_cache_lookup("miss");
            return Ok(gateway_timeout());
        }
        None => false,
    };
    metrics::record_cache_lookup(if cached.is_some() { "stale" } else { "miss" });

    let request_headers = request.headers().clone();
    let url = request.uri().to_string();
    let response = inner.call(request).await?;

    if revalidating && response.status() == StatusCode::NOT_MODIFIED {
        if let Some(mut entry) = cached {
            entry.refresh(response.headers(), now);
            save(store.as_ref(), &key, &entry).await;
            match entry.to_response() {
                Ok(refreshed) => {
                    metrics::record_cache_lookup("revalidated");
                    tracing::debug!(url = %url, "Cached response revalidated");
                    return Ok(mark_from_cache(refreshed));
                }
                Err(e) => tracing::warn!(error = %e, "Discarding unreadable cache entry"),
            }
            return Ok(response);
        }
    }

    if is_storable(&request_cc, &response) {
        let entry = CachedResponse::capture(&request_headers, &response, now);
        save(store.as_ref(), &key, &entry).await;
    } else if let Err(e) = store.delete(&key).await {
        tracing::warn!(error = %e, "Cache invalidation failed");
    }

    Ok(response)
}

/// GET and HEAD without a byte range.
fn is_cacheable<B>(request: &Request<B>) -> bool {
    (request.method() == Method::GET || request.method() == Method::HEAD)
        && !request.headers().contains_key(RANGE)
}

/// Request identity: the URL for GET, method and URL otherwise.
pub fn cache_key<B>(request: &Request<B>) -> String {
    if request.method() == Method::GET {
        request.uri().to_string()
    } else {
        format!("{} {}", request.method(), request.uri())
    }
}

/// Backend key for a request; hashed to stay within backend key limits.
pub fn store_key<B>(request: &Request<B>) -> String {
    hashed_key(&cache_key(request))
}

fn hashed_key(key: &str) -> String {
    format!("httpcache:{:x}", md5::compute(key))
}

async fn lookup<C: CacheStore>(store: &C, key: &str, request_headers: &HeaderMap) -> Option<CachedResponse> {
    let bytes = match store.get(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            metrics::record_cache_lookup("error");
            tracing::warn!(error = %e, "Cache lookup failed");
            return None;
        }
    };

    match CachedResponse::decode(&bytes) {
        Ok(entry) if entry.matches_vary(request_headers) => Some(entry),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable cache entry");
            None
        }
    }
}

async fn save<C: CacheStore>(store: &C, key: &str, entry: &CachedResponse) {
    let result = match entry.encode() {
        Ok(encoded) => store.set(key, &encoded).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "Cache store failed");
    }
}

/// Add `If-None-Match` / `If-Modified-Since` from the stored entry unless the
/// caller already made the request conditional. Returns whether any was added.
fn add_validators(entry: &CachedResponse, headers: &mut HeaderMap) -> bool {
    if headers.contains_key(IF_NONE_MATCH) || headers.contains_key(IF_MODIFIED_SINCE) {
        return false;
    }

    let mut added = false;
    if let Some(etag) = entry.etag().and_then(|v| HeaderValue::from_bytes(v).ok()) {
        headers.insert(IF_NONE_MATCH, etag);
        added = true;
    }
    if let Some(modified) = entry.last_modified().and_then(|v| HeaderValue::from_bytes(v).ok()) {
        headers.insert(IF_MODIFIED_SINCE, modified);
        added = true;
    }
    added
}

fn mark_from_cache(mut response: Response<Bytes>) -> Response<Bytes> {
    response
        .headers_mut()
        .insert(HeaderName::from_static(X_FROM_CACHE), HeaderValue::from_static("1"));
    response
}

fn gateway_timeout() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
    response
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
