//! Configuration validation.
//!
//! # Responsibilities
//! - Validate value ranges (timeouts > 0)
//! - Reject a dial timeout longer than the request timeout it sits inside
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is handed to the client factory

use crate::config::schema::ClientConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A duration that must be positive was zero.
    ZeroDuration(&'static str),
    /// Dial timeout exceeds the request timeout.
    DialExceedsRequest { dial_ms: u64, request_ms: u64 },
    /// Cache enabled with a zero operation timeout.
    ZeroCacheTimeout,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::ZeroDuration(field) => write!(f, "{} must be greater than zero", field),
            ValidationError::DialExceedsRequest { dial_ms, request_ms } => write!(
                f,
                "timeouts.dial_ms ({}) must not exceed timeouts.request_ms ({})",
                dial_ms, request_ms
            ),
            ValidationError::ZeroCacheTimeout => {
                write!(f, "cache.op_timeout_ms must be greater than zero when the cache is enabled")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration, collecting every violation.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let timeouts = &config.timeouts;

    if timeouts.dial_ms == 0 {
        errors.push(ValidationError::ZeroDuration("timeouts.dial_ms"));
    }
    if timeouts.request_ms == 0 {
        errors.push(ValidationError::ZeroDuration("timeouts.request_ms"));
    }
    if timeouts.dial_ms > timeouts.request_ms && timeouts.request_ms > 0 {
        errors.push(ValidationError::DialExceedsRequest {
            dial_ms: timeouts.dial_ms,
            request_ms: timeouts.request_ms,
        });
    }
    if config.cache.enabled && config.cache.op_timeout_ms == 0 {
        errors.push(ValidationError::ZeroCacheTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
