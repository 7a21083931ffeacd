use thiserror::Error;
use verbena_routine::ValidationReport;

use crate::activity::ActivityError;

/// Errors that terminate an execution.
#[derive(Debug, Error)]
pub enum EngineError {
  /// The routine failed structural validation; execution never started.
  #[error("routine failed validation: {0}")]
  Validation(ValidationReport),

  /// A node failed fatally and the execution was aborted.
  #[error("node '{node_id}' failed: {source}")]
  NodeFailed {
    node_id: String,
    #[source]
    source: ActivityError,
  },

  /// Internal scheduler inconsistency: work remains but can never run.
  #[error("execution stalled: {detail}")]
  Stalled { detail: String },

  /// The execution was cancelled from outside.
  #[error("execution cancelled")]
  Cancelled,

  /// The execution exceeded its wall-clock deadline.
  #[error("execution deadline exceeded")]
  DeadlineExceeded,
}

impl EngineError {
  /// Stable taxonomy name for the persisted error surface.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Validation(_) => "validation",
      Self::NodeFailed { source, .. } => source.kind(),
      Self::Stalled { .. } => "stalled",
      Self::Cancelled => "cancelled",
      Self::DeadlineExceeded => "timeout",
    }
  }
}
