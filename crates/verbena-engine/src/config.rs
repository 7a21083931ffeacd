use std::time::Duration;

use crate::retry::RetryPolicy;

/// Engine configuration, applied per execution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Concurrency cap: at most this many activities in flight.
  pub max_concurrent_activities: usize,
  /// Per-activity start-to-close deadline, applied to each attempt.
  pub activity_timeout: Duration,
  /// Retry policy for retryable plugin failures.
  pub retry: RetryPolicy,
  /// Optional overall wall-clock deadline for the execution.
  pub execution_deadline: Option<Duration>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_concurrent_activities: 20,
      activity_timeout: Duration::from_secs(300),
      retry: RetryPolicy::default(),
      execution_deadline: None,
    }
  }
}
