use serde::{Deserialize, Serialize};

fn main_connection() -> String {
  "main".to_string()
}

/// A port-to-port connection between two nodes.
///
/// Connections carry items from a source node's output port to a target
/// node's input port. There are no conditional connection types: branching is
/// expressed by nodes emitting on some ports and leaving others empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDef {
  pub id: String,
  pub source_node_id: String,
  pub source_port: String,
  pub target_node_id: String,
  pub target_port: String,
  #[serde(default = "main_connection", rename = "type")]
  pub connection_type: String,
}
