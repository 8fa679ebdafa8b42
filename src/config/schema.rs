//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the outbound client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Shared response cache settings.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Timeout configuration for outbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub dial_ms: u64,

    /// Round-trip timeout in milliseconds. Also bounds the handshake window
    /// of a fresh connection and, halved, the wait for response headers.
    pub request_ms: u64,
}

impl TimeoutConfig {
    pub fn dial(&self) -> Duration {
        Duration::from_millis(self.dial_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    /// Bound on the wait for response headers: half the request timeout.
    pub fn response_header(&self) -> Duration {
        self.request() / 2
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_ms: 5_000,
            request_ms: 20_000,
        }
    }
}

/// Remote response cache configuration.
///
/// The cache address itself is not configured here; it is discovered from
/// the environment (see [`crate::cache::CacheAddress`]).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Put the shared cache in front of the timeout transport.
    pub enabled: bool,

    /// Upper bound for a single cache get/set/delete in milliseconds.
    pub op_timeout_ms: u64,
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            op_timeout_ms: 500,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
