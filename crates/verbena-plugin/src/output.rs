use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Provenance attached to every output item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
  #[serde(default)]
  pub source_node: String,
  #[serde(default)]
  pub source_port: String,
  /// Iteration index, set by loop-style plugins on their `body` items.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub iteration: Option<u64>,
  /// Opaque per-iteration accumulator, carried into downstream contexts.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub accumulator: Option<serde_json::Value>,
}

/// One item flowing along a connection.
///
/// An item whose `data` is JSON null is still an item - it is not the same as
/// an empty port, which means "this branch does not fire".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
  pub data: serde_json::Value,
  #[serde(default)]
  pub metadata: ItemMetadata,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl OutputItem {
  pub fn new(data: serde_json::Value) -> Self {
    Self {
      data,
      metadata: ItemMetadata::default(),
      error: None,
    }
  }

  pub fn with_iteration(mut self, iteration: u64) -> Self {
    self.metadata.iteration = Some(iteration);
    self
  }
}

/// Port name → items emitted on that port.
///
/// An empty item list on a port is legal and meaningful: downstream of that
/// port is pruned for the current context.
pub type NodeOutputs = HashMap<String, Vec<OutputItem>>;

/// Build a single-port output map, the common case for simple plugins.
pub fn single_port(port: impl Into<String>, items: Vec<OutputItem>) -> NodeOutputs {
  let mut outputs = NodeOutputs::new();
  outputs.insert(port.into(), items);
  outputs
}
