//! Retry policy for transient activity failures.

use std::time::Duration;

/// Exponential backoff configuration for retryable plugin errors.
///
/// `max_attempts` counts the first attempt, so the default of 3 means one
/// initial try plus two retries (1s then 2s apart).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub initial_interval: Duration,
  pub backoff_factor: f64,
  pub max_interval: Duration,
}

impl RetryPolicy {
  pub fn new(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      initial_interval: Duration::from_secs(1),
      backoff_factor: 2.0,
      max_interval: Duration::from_secs(60),
    }
  }

  pub fn with_initial_interval(mut self, interval: Duration) -> Self {
    self.initial_interval = interval;
    self
  }

  pub fn with_backoff_factor(mut self, factor: f64) -> Self {
    self.backoff_factor = factor;
    self
  }

  pub fn with_max_interval(mut self, interval: Duration) -> Self {
    self.max_interval = interval;
    self
  }

  /// Delay before the retry following `attempt` (1-indexed: the delay after
  /// the first failed attempt is the initial interval).
  pub fn delay(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let scaled = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(exponent as i32);
    Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
  }

  /// Whether another attempt is allowed after `attempt` attempts have run.
  pub fn should_retry(&self, attempt: u32) -> bool {
    attempt < self.max_attempts
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(3)
  }
}
