//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Log at a level chosen at runtime
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - tracing orders levels by verbosity (`ERROR < WARN < ... < TRACE`),
//!   so "more severe" means "smaller"

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. Safe to call once per process.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("docwire={}", level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Returns the more severe of two levels.
pub fn most_severe(a: Level, b: Level) -> Level {
    if a < b {
        a
    } else {
        b
    }
}

/// Whether an event at `level` would be recorded at this call site.
pub fn level_enabled(level: Level) -> bool {
    match level {
        Level::ERROR => tracing::enabled!(Level::ERROR),
        Level::WARN => tracing::enabled!(Level::WARN),
        Level::INFO => tracing::enabled!(Level::INFO),
        Level::DEBUG => tracing::enabled!(Level::DEBUG),
        _ => tracing::enabled!(Level::TRACE),
    }
}

/// Emits `message` at a runtime-selected level.
pub fn log_at(level: Level, message: &str) {
    match level {
        Level::ERROR => tracing::error!("{}", message),
        Level::WARN => tracing::warn!("{}", message),
        Level::INFO => tracing::info!("{}", message),
        Level::DEBUG => tracing::debug!("{}", message),
        _ => tracing::trace!("{}", message),
    }
}
