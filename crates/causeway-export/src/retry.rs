//! Retry schedule with exponential backoff

use std::time::Duration;

/// Exponential backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied per retry
    pub backoff_multiplier: f64,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Random spread (0.0 to 1.0) applied to each delay, still within the cap
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let cap = self.max_delay.as_secs_f64();
        let mut delay = base.min(cap);

        if self.jitter > 0.0 && delay > 0.0 {
            let spread = delay * self.jitter;
            delay += (rand::random::<f64>() * 2.0 - 1.0) * spread;
        }

        Duration::from_secs_f64(delay.clamp(0.0, cap))
    }
}
