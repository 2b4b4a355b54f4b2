//! Retry policies and backoff strategies

use crate::config::RetryConfig;
use std::time::Duration;

/// Decides whether a failed attempt may be repeated and how long to wait first.
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: u32) -> bool;
    fn delay(&self, attempt: u32) -> Duration;
    fn max_attempts(&self) -> u32;
}

/// Exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig, max_attempts: u32) -> Self {
        Self {
            config,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_ms = self.config.max_delay_ms as f64;
        let scaled = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);

        // Clamp in f64 so huge exponents saturate instead of overflowing a Duration.
        let delay_ms = (if scaled.is_finite() {
            scaled.clamp(0.0, max_ms)
        } else {
            max_ms
        }) as u64;

        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            fastrand::u64(0..=self.config.jitter_ms)
        };
        Duration::from_millis(delay_ms.saturating_add(jitter))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
