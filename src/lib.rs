//! Hardened outbound HTTP client.
//!
//! No single network operation can hang indefinitely: connects are bounded by
//! the dial timeout, a fresh connection must produce its first byte before a
//! handshake deadline, and every round-trip runs against its own timer. Every
//! request is authenticated with a fixed credential, and an optional shared
//! response cache can be layered in front.

pub mod cache;
pub mod client;
pub mod config;
pub mod net;
pub mod observability;
pub mod transport;

pub use client::{build_cache_transport, build_cached_client, build_client, HttpClient};
pub use config::ClientConfig;
pub use transport::{Credential, Error, ErrorKind, TimeoutTransport};
