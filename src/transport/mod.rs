//! Outbound transport subsystem.
//!
//! # Data Flow
//! ```text
//! Request<Bytes>
//!     → auth.rs (authorization header overwritten with the credential)
//!     → timeout.rs (per-request timer armed; dispatch via the bounded dialer)
//!     → response headers (bounded at half the request timeout)
//!     → response body collected (bounded by the request timer)
//!     → Response<Bytes> or exactly one error
//! ```
//!
//! # Design Decisions
//! - Every transport is a `tower::Service<Request<Bytes>>` so layers compose
//! - Timeouts are non-negotiable; every round-trip has a deadline
//! - Errors are terminal; retrying is the caller's decision

pub mod auth;
pub mod error;
pub mod timeout;

pub use auth::{Credential, InvalidCredential, AUTH_SCHEME};
pub use error::{BoxError, Error, ErrorKind};
pub use timeout::{TimeoutTransport, TransportStats};
