//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → CLI overrides applied by the binary, validated again
//!     → shared via Arc with the server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the mode is fixed for every session
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, read_config, ConfigError};
pub use schema::{CaptureConfig, ListenerConfig, ObservabilityConfig, ServerConfig, UpstreamConfig};
pub use validation::{validate_config, ValidationError};
