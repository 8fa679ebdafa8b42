//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dialer, transport and cache produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, histograms via `metrics`)
//!
//! Consumers:
//!     → stderr (fmt subscriber installed by the binary)
//!     → whatever metrics recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - Request ID (UUID v4) attached to every round-trip log event
//! - Metrics are cheap no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
