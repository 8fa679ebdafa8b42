//! Shared response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Request<Bytes>
//!     → transport.rs (cacheable? lookup by request identity)
//!         hit & fresh  → cached response, no network
//!         hit & stale  → conditional request to the inner transport
//!         miss         → inner transport
//!     → entry.rs (freshness, validators, Vary matching, serialization)
//!     → store.rs / memcache.rs (opaque key-value backend)
//! ```
//!
//! # Design Decisions
//! - The cache wraps a transport; it never talks to the network itself
//! - Backend failures degrade to a miss; they never fail the request
//! - No locking around the backend; consistency is the backend's concern

pub mod address;
pub mod entry;
pub mod memcache;
pub mod store;
pub mod transport;

pub use address::CacheAddress;
pub use entry::{CacheControl, CachedResponse};
pub use memcache::MemcacheStore;
pub use store::{CacheError, CacheStore, MemoryStore};
pub use transport::{CacheLayer, CacheTransport, X_FROM_CACHE};
