//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request needs a connection
//!     → dialer.rs (resolve + connect, bounded by the dial timeout)
//!     → connection.rs (handshake deadline armed until the first read completes)
//!     → Hand off to the HTTP/1 connection of one round-trip
//!
//! Connection States:
//!     Guarded (deadline armed) → Unguarded (deadline cleared)
//! ```
//!
//! # Design Decisions
//! - The dialer is the only way the transport opens connections
//! - A connection is owned by the round-trip that dialed it; deadlines are never shared
//! - The Guarded → Unguarded transition is one-way

pub mod connection;
pub mod dialer;

pub use connection::{ConnectionId, GuardedConnection, HandshakeTimedOut};
pub use dialer::{BoundedDialer, DialError, Network};
