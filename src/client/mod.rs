//! Client assembly.
//!
//! # Data Flow
//! ```text
//! ClientConfig + Credential
//!     → factory.rs build_client()          → HttpClient<TimeoutTransport>
//!     → factory.rs build_cache_transport() → CacheLayer<MemcacheStore>
//!     → factory.rs build_cached_client()   → HttpClient<CacheTransport<TimeoutTransport, _>>
//! ```
//!
//! # Design Decisions
//! - No ambient globals: configuration and credential are passed in
//! - The cache layer always sits in front of the timeout transport, so
//!   cache misses inherit every network bound

pub mod factory;
pub mod http_client;

pub use factory::{build_cache_transport, build_cache_transport_at, build_cached_client, build_client};
pub use http_client::HttpClient;
