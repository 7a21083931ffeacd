//! The plugin activity port.
//!
//! Uniform invocation of a plugin: registry lookup, input schema validation,
//! credential loading, the plugin call itself, and output schema validation.
//! Retryable failures are absorbed here under the configured policy; every
//! error that escapes this module is final for the task.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use verbena_plugin::{
  validate_against_schema, CredentialError, CredentialStore, NodeOutputs, PluginContext,
  PluginError, PluginRegistry,
};

use crate::retry::RetryPolicy;

/// Liveness callback, invoked before and after each plugin call so a durable
/// runtime can detect a stuck worker.
pub trait Heartbeat: Send + Sync {
  fn beat(&self, execution_id: &str, node_id: &str);
}

/// Discards heartbeats. The default outside a durable runtime.
#[derive(Debug, Clone, Default)]
pub struct NoopHeartbeat;

impl Heartbeat for NoopHeartbeat {
  fn beat(&self, _execution_id: &str, _node_id: &str) {}
}

/// Terminal failure of one activity.
#[derive(Debug, Error)]
pub enum ActivityError {
  #[error(transparent)]
  Plugin(#[from] PluginError),

  /// The plugin ignored cancellation past its deadline and was abandoned.
  #[error("activity abandoned after exceeding its {}s deadline", timeout.as_secs())]
  Aborted { timeout: Duration },
}

impl ActivityError {
  /// Stable taxonomy name for the persisted error surface.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Plugin(e) => e.kind(),
      Self::Aborted { .. } => "aborted",
    }
  }
}

/// One prepared plugin invocation: parameters already resolved, inputs
/// already gathered, context lacking only credentials.
pub struct ActivityInvocation {
  pub plugin_id: String,
  pub parameters: serde_json::Value,
  pub inputs: NodeOutputs,
  /// Credential alias → credential id, from the node definition.
  pub credential_mappings: std::collections::HashMap<String, String>,
  pub context: PluginContext,
}

/// Execute one activity to a terminal outcome.
pub async fn execute_activity(
  registry: &PluginRegistry,
  credentials: &dyn CredentialStore,
  heartbeat: &dyn Heartbeat,
  retry: &RetryPolicy,
  timeout: Duration,
  mut invocation: ActivityInvocation,
) -> Result<NodeOutputs, ActivityError> {
  let node_id = invocation.context.node_id.clone();
  let plugin = registry.get(&invocation.plugin_id)?;
  let descriptor = plugin.descriptor();

  // Input schema check, over the port → data-items view.
  let inputs_value = ports_as_value(&invocation.inputs);
  if let Err(violations) = validate_against_schema(&descriptor.input_schema, &inputs_value) {
    return Err(
      PluginError::InvalidInput {
        node_id,
        message: violations.join("; "),
      }
      .into(),
    );
  }

  // Credentials: fetched per invocation, passed by value, never cached.
  for request in &descriptor.credential_requests {
    match invocation.credential_mappings.get(&request.alias) {
      Some(credential_id) => {
        match credentials
          .fetch(&invocation.context.user_id, credential_id)
          .await
        {
          Ok(data) => {
            invocation.context.credentials.insert(request.alias.clone(), data);
          }
          Err(CredentialError::NotFound { .. }) => {
            return Err(
              PluginError::MissingCredentials {
                node_id,
                alias: request.alias.clone(),
              }
              .into(),
            );
          }
          Err(CredentialError::Unavailable(message)) => {
            // Store outage, not a missing credential: transient.
            return Err(PluginError::Retryable(message).into());
          }
        }
      }
      None if request.required => {
        return Err(
          PluginError::MissingCredentials {
            node_id,
            alias: request.alias.clone(),
          }
          .into(),
        );
      }
      None => {}
    }
  }

  let mut attempt: u32 = 0;
  let outputs = loop {
    attempt += 1;
    heartbeat.beat(&invocation.context.execution_id, &node_id);

    let call = plugin.execute(&invocation.inputs, &invocation.parameters, &invocation.context);
    let result = tokio::time::timeout(timeout, call).await;

    heartbeat.beat(&invocation.context.execution_id, &node_id);

    match result {
      Err(_elapsed) => return Err(ActivityError::Aborted { timeout }),
      Ok(Ok(outputs)) => break outputs,
      Ok(Err(e)) if e.is_retryable() && retry.should_retry(attempt) => {
        let delay = retry.delay(attempt);
        warn!(
          node_id = %node_id,
          attempt,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "retrying transient plugin failure"
        );
        tokio::time::sleep(delay).await;
      }
      Ok(Err(e)) => return Err(e.into()),
    }
  };

  // Output schema check, then fill undeclared-but-absent ports so every
  // declared output port is present (empty list = branch does not fire).
  let outputs_value = ports_as_value(&outputs);
  if let Err(violations) = validate_against_schema(&descriptor.output_schema, &outputs_value) {
    return Err(
      PluginError::InvalidOutput {
        node_id,
        message: violations.join("; "),
      }
      .into(),
    );
  }

  let mut outputs = outputs;
  for port in descriptor.output_ports() {
    outputs.entry(port.to_string()).or_default();
  }

  debug!(node_id = %node_id, attempts = attempt, "activity completed");
  Ok(outputs)
}

/// Flatten outputs to `{ port: [item.data, …] }` for schema validation.
fn ports_as_value(outputs: &NodeOutputs) -> serde_json::Value {
  let map: serde_json::Map<String, serde_json::Value> = outputs
    .iter()
    .map(|(port, items)| {
      (
        port.clone(),
        serde_json::Value::Array(items.iter().map(|i| i.data.clone()).collect()),
      )
    })
    .collect();
  serde_json::Value::Object(map)
}
