//! Exponential backoff between work-unit attempts

use std::time::Duration;

use crate::QueueConfig;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    /// Start at `initial_ms`, grow by `multiplier`, cap at `max_ms`.
    pub fn new(initial_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        Self {
            initial_ms,
            max_ms,
            multiplier: multiplier.max(1.0),
            attempt: 0,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.initial_backoff_ms,
            config.max_backoff_ms,
            config.multiplier,
        )
    }

    /// Get the next delay duration and increment the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.initial_ms as f64 * self.multiplier.powi(self.attempt as i32);
        let capped = exp.min(self.max_ms as f64) as u64;
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped)
    }
}
