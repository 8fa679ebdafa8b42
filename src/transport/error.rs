//! Round-trip error taxonomy.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::net::{DialError, HandshakeTimedOut};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by a round-trip. None of them are retried internally.
#[derive(Debug, Error)]
pub enum Error {
    /// Dial exceeded its bound.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Network-level failure while connecting.
    #[error("connect failed: {0}")]
    Connect(#[source] BoxError),

    /// The connection deadline elapsed before the peer sent its first byte.
    #[error("peer sent no data before the handshake deadline")]
    HandshakeTimeout(#[source] BoxError),

    /// The request timer fired before the round-trip completed.
    #[error("request to {url} canceled after {timeout:?}")]
    RequestCanceled { url: String, timeout: Duration },

    /// The server accepted the request but sent no response headers in time.
    #[error("timeout awaiting response headers after {0:?}")]
    ResponseHeaderTimeout(Duration),

    /// Any other transmission fault.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// The request could not be dispatched as given.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Coarse classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectTimeout,
    ConnectError,
    HandshakeTimeout,
    RequestCanceled,
    TransportError,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Error::Connect(_) => ErrorKind::ConnectError,
            Error::HandshakeTimeout(_) => ErrorKind::HandshakeTimeout,
            // The header wait is aborted by a timer just like the full round-trip.
            Error::RequestCanceled { .. } | Error::ResponseHeaderTimeout(_) => {
                ErrorKind::RequestCanceled
            }
            Error::Transport(_) | Error::InvalidRequest(_) => ErrorKind::TransportError,
        }
    }

    /// True for every failure caused by an elapsed bound.
    pub fn is_timeout(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::ConnectError | ErrorKind::TransportError
        )
    }

    /// Classify an error surfaced by the HTTP client by walking its source chain.
    pub(crate) fn classify(err: impl Into<BoxError>) -> Self {
        let err = err.into();
        match Cause::find(err.as_ref()) {
            Cause::DialTimeout { addr, timeout } => Error::ConnectTimeout { addr, timeout },
            Cause::Dial => Error::Connect(err),
            Cause::Handshake => Error::HandshakeTimeout(err),
            Cause::Other => Error::Transport(err),
        }
    }
}

/// Root cause found in an error's source chain.
enum Cause {
    DialTimeout { addr: String, timeout: Duration },
    Dial,
    Handshake,
    Other,
}

impl Cause {
    fn find(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut source = Some(err);
        while let Some(current) = source {
            if let Some(dial) = current.downcast_ref::<DialError>() {
                return match dial {
                    DialError::Timeout { addr, timeout } => Cause::DialTimeout {
                        addr: addr.clone(),
                        timeout: *timeout,
                    },
                    _ => Cause::Dial,
                };
            }
            if let Some(io_err) = current.downcast_ref::<io::Error>() {
                if HandshakeTimedOut::is(io_err) {
                    return Cause::Handshake;
                }
            }
            source = current.source();
        }
        Cause::Other
    }
}
