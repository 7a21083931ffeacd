use thiserror::Error;

use crate::validate::ValidationReport;

#[derive(Debug, Error)]
pub enum RoutineError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("routine failed validation: {0}")]
  Invalid(ValidationReport),
}
