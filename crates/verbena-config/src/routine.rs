use serde::{Deserialize, Serialize};

use crate::connection::ConnectionDef;
use crate::node::NodeDef;
use crate::variable::VariableDef;

/// The payload produced by a trigger source (manual, scheduled, webhook).
///
/// The engine does not originate triggers; it only threads the payload
/// through to `{{ trigger.… }}` references and plugin contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
  #[serde(default)]
  pub trigger_type: String,
  #[serde(default)]
  pub data: serde_json::Value,
}

/// A routine as delivered by the durable runtime.
///
/// An absent `variables` array and an empty one behave identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineInput {
  pub routine_id: String,
  pub user_id: String,
  pub nodes: Vec<NodeDef>,
  pub connections: Vec<ConnectionDef>,
  #[serde(default)]
  pub variables: Vec<VariableDef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub trigger: Option<TriggerPayload>,
}
