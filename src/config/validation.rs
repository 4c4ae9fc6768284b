//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check mode/upstream consistency
//! - Validate addresses and limits
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError {
            field: "listener.bind_address",
            message: format!("{:?} is not a socket address", config.listener.bind_address),
        });
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError {
            field: "listener.max_connections",
            message: "must be greater than 0".to_string(),
        });
    }

    if config.mode.uses_proxy() && config.proxy.address.is_empty() {
        errors.push(ValidationError {
            field: "proxy.address",
            message: format!("required in {} mode", config.mode),
        });
    }

    if config.proxy.max_attempts == 0 {
        errors.push(ValidationError {
            field: "proxy.max_attempts",
            message: "must be greater than 0".to_string(),
        });
    }

    if let Some(dir) = &config.capture.dir {
        if dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "capture.dir",
                message: "must not be empty".to_string(),
            });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError {
            field: "observability.metrics_address",
            message: format!("{:?} is not a socket address", config.observability.metrics_address),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
