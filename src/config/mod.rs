//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → CLI overrides applied by the binary
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to the client factory
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; it is read concurrently by every in-flight request
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{CacheConfig, ClientConfig, ObservabilityConfig, TimeoutConfig};
pub use validation::{validate_config, ValidationError};
