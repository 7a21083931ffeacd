use thiserror::Error;

/// Errors surfaced by plugin resolution and invocation.
///
/// Only `Retryable` is subject to the runner's retry policy; every other
/// variant is fatal for the execution.
#[derive(Debug, Error)]
pub enum PluginError {
  /// Referenced plugin is not present in the registry.
  #[error("plugin not found: {plugin_id}")]
  NotFound { plugin_id: String },

  /// Inputs did not match the plugin's declared input schema.
  #[error("invalid input for node '{node_id}': {message}")]
  InvalidInput { node_id: String, message: String },

  /// Outputs did not match the plugin's declared output schema.
  #[error("invalid output from node '{node_id}': {message}")]
  InvalidOutput { node_id: String, message: String },

  /// A required credential could not be fetched.
  #[error("missing credential '{alias}' for node '{node_id}'")]
  MissingCredentials { node_id: String, alias: String },

  /// The plugin signalled a transient failure (network, rate limit, …).
  #[error("transient plugin failure: {0}")]
  Retryable(String),

  /// The plugin signalled a permanent failure.
  #[error("plugin failure: {0}")]
  Fatal(String),
}

impl PluginError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Retryable(_))
  }

  /// Stable taxonomy name for the persisted error surface.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::NotFound { .. } => "plugin_not_found",
      Self::InvalidInput { .. } => "invalid_input",
      Self::InvalidOutput { .. } => "invalid_output",
      Self::MissingCredentials { .. } => "missing_credentials",
      Self::Retryable(_) => "plugin_error_retryable",
      Self::Fatal(_) => "plugin_error_fatal",
    }
  }
}
