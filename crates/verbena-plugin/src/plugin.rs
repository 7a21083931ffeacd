use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use verbena_config::TriggerPayload;

use crate::credentials::CredentialData;
use crate::descriptor::PluginDescriptor;
use crate::error::PluginError;
use crate::output::NodeOutputs;

/// Everything a plugin may read during one invocation.
///
/// Credentials are fetched per invocation and passed by value; the engine
/// discards them when the call returns. Plugins are expected to poll `cancel`
/// at natural suspension points - the engine never aborts them forcibly.
#[derive(Debug, Clone)]
pub struct PluginContext {
  pub user_id: String,
  pub routine_id: String,
  pub execution_id: String,
  pub node_id: String,
  pub credentials: HashMap<String, CredentialData>,
  pub trigger: TriggerPayload,
  pub loop_iteration: Option<u64>,
  pub loop_accumulator: Option<serde_json::Value>,
  pub cancel: CancellationToken,
}

/// The plugin capability set.
///
/// Implementations are pure in the engine's eyes: they receive inputs,
/// resolved config, and a context, and return outputs. They never touch
/// engine state.
#[async_trait]
pub trait Plugin: Send + Sync {
  /// Static identity and declared schemas.
  fn descriptor(&self) -> &PluginDescriptor;

  /// Run the plugin.
  ///
  /// `inputs` maps each declared input port to the items gathered from
  /// upstream. `config` is the node's parameters after expression
  /// resolution. The returned map must cover the declared output ports;
  /// an empty list on a port means that branch does not fire.
  async fn execute(
    &self,
    inputs: &NodeOutputs,
    config: &serde_json::Value,
    context: &PluginContext,
  ) -> Result<NodeOutputs, PluginError>;
}
