//! Bounded dialer.
//!
//! # Responsibilities
//! - Resolve and connect to a remote address within the dial timeout
//! - Arm the handshake deadline on every new connection
//! - Act as the connector of the HTTP client (`tower::Service<Uri>`)
//!
//! # Design Decisions
//! - Resolution and connection attempts share a single dial budget
//! - Candidates are tried in resolver order; the last error is reported
//! - TLS is not performed here; a TLS connector may wrap this one, in which
//!   case the handshake deadline covers the TLS handshake as well

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use http::Uri;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tower::Service;

use crate::config::TimeoutConfig;
use crate::net::connection::GuardedConnection;

/// Network type accepted by [`BoundedDialer::dial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// IPv4 or IPv6.
    Tcp,
    /// IPv4 only.
    Tcp4,
    /// IPv6 only.
    Tcp6,
}

impl Network {
    fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }
}

impl FromStr for Network {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(DialError::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Tcp4 => write!(f, "tcp4"),
            Network::Tcp6 => write!(f, "tcp6"),
        }
    }
}

/// Errors produced while establishing a connection.
#[derive(Debug, Error)]
pub enum DialError {
    /// Connection was not established within the dial timeout.
    #[error("dial {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    /// Every connection attempt failed.
    #[error("dial {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Address resolution failed.
    #[error("resolve {addr} failed: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Resolution produced no address usable with the requested network.
    #[error("no {network} address found for {addr}")]
    NoAddress { addr: String, network: Network },

    /// Network type other than tcp/tcp4/tcp6.
    #[error("unsupported network type: {0}")]
    UnsupportedNetwork(String),

    /// URI without a host.
    #[error("cannot dial uri without host: {0}")]
    InvalidUri(String),
}

impl DialError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DialError::Timeout { .. })
    }
}

/// Opens connections with an upper bound on connect time.
///
/// Every returned connection is wrapped in a [`GuardedConnection`] whose
/// deadline is `handshake_timeout` from the moment the connection was made.
#[derive(Debug, Clone)]
pub struct BoundedDialer {
    dial_timeout: Duration,
    handshake_timeout: Duration,
}

impl BoundedDialer {
    pub fn new(dial_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            handshake_timeout,
        }
    }

    /// Dial timeout from `dial_ms`; handshake deadline from `request_ms`.
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self::new(config.dial(), config.request())
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Connect to `addr` (`host:port`) over `network`.
    pub async fn dial(
        &self,
        network: Network,
        addr: &str,
    ) -> Result<GuardedConnection<TcpStream>, DialError> {
        let started = Instant::now();

        let stream = match tokio::time::timeout(self.dial_timeout, connect(network, addr)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::debug!(addr = %addr, timeout = ?self.dial_timeout, "Dial timed out");
                return Err(DialError::Timeout {
                    addr: addr.to_string(),
                    timeout: self.dial_timeout,
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let conn = GuardedConnection::new(stream, self.handshake_timeout);
        tracing::debug!(
            connection_id = %conn.id(),
            addr = %addr,
            elapsed = ?started.elapsed(),
            "Connection established"
        );
        Ok(conn)
    }
}

impl From<&TimeoutConfig> for BoundedDialer {
    fn from(config: &TimeoutConfig) -> Self {
        Self::from_config(config)
    }
}

async fn connect(network: Network, addr: &str) -> Result<TcpStream, DialError> {
    let candidates = tokio::net::lookup_host(addr)
        .await
        .map_err(|source| DialError::Resolve {
            addr: addr.to_string(),
            source,
        })?;

    let mut last_error = None;
    for candidate in candidates.filter(|a| network.accepts(a)) {
        match TcpStream::connect(candidate).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::trace!(addr = %candidate, error = %e, "Connection attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(source) => DialError::Connect {
            addr: addr.to_string(),
            source,
        },
        None => DialError::NoAddress {
            addr: addr.to_string(),
            network,
        },
    })
}

/// `host:port` for a request URI, defaulting the port from the scheme.
fn authority_addr(uri: &Uri) -> Result<String, DialError> {
    let host = uri
        .host()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DialError::InvalidUri(uri.to_string()))?;
    let port = match uri.port_u16() {
        Some(port) => port,
        None if uri.scheme_str() == Some("https") => 443,
        None => 80,
    };
    Ok(format!("{}:{}", host, port))
}

impl Service<Uri> for BoundedDialer {
    type Response = TokioIo<GuardedConnection<TcpStream>>;
    type Error = DialError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let dialer = self.clone();
        Box::pin(async move {
            let addr = authority_addr(&uri)?;
            let conn = dialer.dial(Network::Tcp, &addr).await?;
            Ok(TokioIo::new(conn))
        })
    }
}
