//! Capped exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::UpstreamConfig;

/// Delay policy between upstream connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another dial may follow failed attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay after failed attempt number `attempt`: `base * 2^(attempt-1)`,
    /// capped at `max`, plus up to 10% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        let spread = nominal.as_millis() as u64 / 10;
        if spread == 0 {
            return nominal;
        }
        nominal + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    fn nominal(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}
