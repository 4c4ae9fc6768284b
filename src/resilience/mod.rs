//! Upstream reconnect policy.
//!
//! The proxy handler keeps one upstream connection per session and redials
//! it lazily; `backoff.rs` decides how long to wait between dials.

pub mod backoff;

pub use backoff::Backoff;
