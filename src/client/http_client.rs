//! Convenience front for a transport service.

use bytes::Bytes;
use http::{Request, Response};
use tower::{Service, ServiceExt};

use crate::transport::Error;

/// A ready-to-use HTTP client over any transport service.
///
/// No redirect policy or cookie jar is applied; the response is whatever the
/// transport returns.
#[derive(Debug, Clone)]
pub struct HttpClient<S> {
    transport: S,
}

impl<S> HttpClient<S>
where
    S: Service<Request<Bytes>, Response = Response<Bytes>, Error = Error> + Clone,
{
    pub fn new(transport: S) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    /// Send a request. Safe to call concurrently; each call gets its own timer and connection.
    pub async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        self.transport.clone().oneshot(request).await
    }

    /// Send a `GET` for `uri`.
    pub async fn get(&self, uri: &str) -> Result<Response<Bytes>, Error> {
        let request = Request::get(uri)
            .body(Bytes::new())
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        self.send(request).await
    }
}
