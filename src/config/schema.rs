//! Server configuration, as read from TOML.
//!
//! Every section has defaults, so an empty file is a valid direct-mode config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clientconn::Mode;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Operating mode applied to every accepted connection.
    pub mode: Mode,

    /// Upstream reference server, required unless mode is `direct`.
    pub proxy: UpstreamConfig,

    /// Raw traffic capture.
    pub capture: CaptureConfig,

    pub observability: ObservabilityConfig,
}

/// Client-facing socket.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:27017").
    pub bind_address: String,

    /// Sessions served at once; further clients wait in the accept backlog.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:27017".to_string(),
            max_connections: 1024,
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:37017"). Empty means unset.
    pub address: String,

    /// Per-dial timeout in seconds.
    pub connect_timeout_secs: u64,

    /// First redial delay in milliseconds; doubles per attempt.
    pub base_delay_ms: u64,

    /// Redial delay ceiling in milliseconds.
    pub max_delay_ms: u64,

    /// Connection attempts before giving up.
    pub max_attempts: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout_secs: 5,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            max_attempts: 3,
        }
    }
}

/// Capture settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory for captured inbound traffic; capture is off when unset.
    pub dir: Option<PathBuf>,
}

/// Logging and metrics.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter; `RUST_LOG` overrides it.
    pub log_level: String,

    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    /// Prometheus scrape address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
