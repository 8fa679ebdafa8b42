//! Timeout-enforcing transport.
//!
//! # Responsibilities
//! - Inject the credential into every outgoing request
//! - Arm one timer per round-trip and abort the round-trip when it fires
//! - Bound the wait for response headers at half the request timeout
//! - Collect the response body within the same request budget
//!
//! # Design Decisions
//! - Each round-trip dials its own connection through the [`BoundedDialer`],
//!   so the dial bound and its `ConnectTimeout` are independent of the
//!   header bound
//! - The header timer starts once the connection is established and covers
//!   writing the request and waiting for the response head
//! - Cancellation is structured: the in-flight exchange future is dropped
//!   when a timer wins, which aborts its connection task and closes the socket
//! - A header timeout is a cancellation like the request timer firing
//! - The timer is dropped with the round-trip, so no cancellation can fire
//!   after a response has been returned
//! - Completion wins a tie with the timer

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::HOST;
use http::{HeaderValue, Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use tokio::task::JoinHandle;
use tower::{Service, ServiceExt};
use uuid::Uuid;

use crate::config::TimeoutConfig;
use crate::net::BoundedDialer;
use crate::observability::metrics;
use crate::transport::auth::Credential;
use crate::transport::error::Error;

/// Snapshot of round-trip outcomes for one transport (and its clones).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub completed: u64,
    pub canceled: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    canceled: AtomicU64,
    failed: AtomicU64,
}

/// HTTP transport where no network operation can hang indefinitely.
///
/// Clones share configuration and counters. Connections are never shared:
/// every round-trip dials, uses and closes its own.
#[derive(Clone)]
pub struct TimeoutTransport {
    dialer: BoundedDialer,
    credential: Credential,
    request_timeout: Duration,
    header_timeout: Duration,
    counters: Arc<Counters>,
}

impl TimeoutTransport {
    /// Build a transport dialing through a [`BoundedDialer`] derived from `config`.
    pub fn new(config: &TimeoutConfig, credential: Credential) -> Self {
        Self {
            dialer: BoundedDialer::from_config(config),
            credential,
            request_timeout: config.request(),
            header_timeout: config.response_header(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            completed: self.counters.completed.load(Ordering::SeqCst),
            canceled: self.counters.canceled.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Perform one request/response exchange.
    pub async fn round_trip(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        if request.uri().authority().is_none() {
            return Err(Error::InvalidRequest(format!(
                "request uri must be absolute: {}",
                request.uri()
            )));
        }

        self.credential.apply(&mut request);

        let in_flight = InFlight::arm(request.uri().to_string(), self.request_timeout);
        let exchange = exchange(self.dialer.clone(), self.header_timeout, request);
        let timer = tokio::time::sleep(self.request_timeout);

        let outcome = tokio::select! {
            biased;
            result = exchange => Some(result),
            () = timer => None,
        };

        match outcome {
            Some(Err(e @ Error::ResponseHeaderTimeout(_))) => Err(in_flight.cancel(&self.counters, Some(e))),
            Some(result) => in_flight.finish(result, &self.counters),
            None => Err(in_flight.cancel(&self.counters, None)),
        }
    }
}

impl std::fmt::Debug for TimeoutTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutTransport")
            .field("dialer", &self.dialer)
            .field("request_timeout", &self.request_timeout)
            .field("header_timeout", &self.header_timeout)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Service<Request<Bytes>> for TimeoutTransport {
    type Response = Response<Bytes>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Bytes>, Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let transport = self.clone();
        Box::pin(async move { transport.round_trip(request).await })
    }
}

/// Background task driving one HTTP/1 connection; aborted when dropped.
struct ConnectionTask(JoinHandle<()>);

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Dial, send the request, wait for headers, then collect the body.
async fn exchange(
    dialer: BoundedDialer,
    header_timeout: Duration,
    request: Request<Bytes>,
) -> Result<Response<Bytes>, Error> {
    let io = dialer
        .oneshot(request.uri().clone())
        .await
        .map_err(Error::classify)?;
    let (mut sender, conn) = http1::handshake(io).await.map_err(Error::classify)?;
    let _task = ConnectionTask(tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "Connection closed with error");
        }
    }));

    let request = into_origin_form(request)?;
    let response = match tokio::time::timeout(header_timeout, async {
        sender.ready().await?;
        sender.send_request(request).await
    })
    .await
    {
        Ok(result) => result.map_err(Error::classify)?,
        Err(_) => return Err(Error::ResponseHeaderTimeout(header_timeout)),
    };

    let (parts, body) = response.into_parts();
    let body = body.collect().await.map_err(Error::classify)?.to_bytes();
    Ok(Response::from_parts(parts, body))
}

/// Rewrite an absolute-form request into the origin form sent on the wire,
/// adding `Host` unless the caller set one.
fn into_origin_form(request: Request<Bytes>) -> Result<Request<Full<Bytes>>, Error> {
    let (mut parts, body) = request.into_parts();

    if !parts.headers.contains_key(HOST) {
        let Some(authority) = parts.uri.authority() else {
            return Err(Error::InvalidRequest(format!("no authority in {}", parts.uri)));
        };
        let host = match authority.port() {
            Some(port) => format!("{}:{}", authority.host(), port),
            None => authority.host().to_string(),
        };
        let host = HeaderValue::from_str(&host).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        parts.headers.insert(HOST, host);
    }

    parts.uri = match parts.uri.path_and_query() {
        Some(path) => Uri::from(path.clone()),
        None => Uri::from_static("/"),
    };
    Ok(Request::from_parts(parts, Full::new(body)))
}

/// Lifecycle of one round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlightState {
    Armed,
    Completed,
    Failed,
    Canceled,
}

/// Handle for one active round-trip and its timer.
///
/// Consumed by exactly one of [`InFlight::finish`] or [`InFlight::cancel`],
/// so only one outcome can reach the caller.
struct InFlight {
    id: Uuid,
    url: String,
    timeout: Duration,
    started: Instant,
    state: InFlightState,
}

impl InFlight {
    fn arm(url: String, timeout: Duration) -> Self {
        let id = Uuid::new_v4();
        tracing::trace!(request_id = %id, url = %url, timeout = ?timeout, "Round-trip started");
        Self {
            id,
            url,
            timeout,
            started: Instant::now(),
            state: InFlightState::Armed,
        }
    }

    fn finish(
        mut self,
        result: Result<Response<Bytes>, Error>,
        counters: &Counters,
    ) -> Result<Response<Bytes>, Error> {
        debug_assert_eq!(self.state, InFlightState::Armed);
        match &result {
            Ok(response) => {
                self.state = InFlightState::Completed;
                counters.completed.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    request_id = %self.id,
                    url = %self.url,
                    status = %response.status(),
                    elapsed = ?self.started.elapsed(),
                    "Round-trip completed"
                );
            }
            Err(e) => {
                self.state = InFlightState::Failed;
                counters.failed.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    request_id = %self.id,
                    url = %self.url,
                    error = %e,
                    "Round-trip failed"
                );
            }
        }
        metrics::record_round_trip(self.outcome_label(&result), self.started);
        result
    }

    fn cancel(mut self, counters: &Counters, reason: Option<Error>) -> Error {
        debug_assert_eq!(self.state, InFlightState::Armed);
        self.state = InFlightState::Canceled;
        counters.canceled.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(request_id = %self.id, url = %self.url, "Canceled request for {}", self.url);
        metrics::record_round_trip("canceled", self.started);

        match reason {
            Some(e) => e,
            None => Error::RequestCanceled {
                url: self.url,
                timeout: self.timeout,
            },
        }
    }

    fn outcome_label(&self, result: &Result<Response<Bytes>, Error>) -> &'static str {
        match (self.state, result) {
            (InFlightState::Completed, _) => "completed",
            (_, Err(e)) if e.is_timeout() => "timeout",
            _ => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(request_ms: u64) -> TimeoutTransport {
        let config = TimeoutConfig {
            dial_ms: request_ms,
            request_ms,
        };
        TimeoutTransport::new(&config, Credential::new("t").unwrap())
    }

    #[tokio::test]
    async fn relative_uri_is_rejected_before_dispatch() {
        let transport = transport(1000);
        let request = Request::get("/repos").body(Bytes::new()).unwrap();

        let err = transport.round_trip(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(transport.stats(), TransportStats::default());
    }

    #[tokio::test]
    async fn header_timeout_is_half_the_request_timeout() {
        let transport = transport(1000);
        assert_eq!(transport.request_timeout(), Duration::from_secs(1));
        assert_eq!(transport.header_timeout, Duration::from_millis(500));
    }

    #[test]
    fn origin_form_keeps_path_and_sets_host() {
        let request = Request::get("http://api.github.com:8443/repos/a/b?page=2")
            .body(Bytes::new())
            .unwrap();
        let request = into_origin_form(request).unwrap();

        assert_eq!(request.uri(), "/repos/a/b?page=2");
        assert_eq!(request.headers()[HOST], "api.github.com:8443");
    }

    #[test]
    fn origin_form_keeps_caller_host() {
        let request = Request::get("http://10.0.0.1")
            .header(HOST, "api.github.com")
            .body(Bytes::new())
            .unwrap();
        let request = into_origin_form(request).unwrap();

        assert_eq!(request.uri(), "/");
        assert_eq!(request.headers()[HOST], "api.github.com");
    }

    #[tokio::test]
    async fn clones_share_counters() {
        let transport = transport(1000);
        let clone = transport.clone();
        clone.counters.completed.fetch_add(1, Ordering::SeqCst);
        assert_eq!(transport.stats().completed, 1);
    }
}
