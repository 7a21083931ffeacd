//! Built-in structural plugins.
//!
//! These are the plugins the engine's routing semantics lean on: branching
//! is an if-else node leaving one port empty, loops are a split node with
//! `body`/`done` ports, fan-in is a merge node. Integrations that talk to
//! the outside world (HTTP, email, …) are hosted out of tree and registered
//! by the embedding application.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::descriptor::PluginDescriptor;
use crate::error::PluginError;
use crate::output::{single_port, NodeOutputs, OutputItem};
use crate::plugin::{Plugin, PluginContext};
use crate::registry::PluginRegistry;

fn ports_schema(ports: &[&str]) -> Value {
  let properties: serde_json::Map<String, Value> = ports
    .iter()
    .map(|p| (p.to_string(), json!({ "type": "array" })))
    .collect();
  json!({ "type": "object", "properties": properties })
}

fn descriptor(id: &str, input_ports: &[&str], output_ports: &[&str]) -> PluginDescriptor {
  PluginDescriptor {
    id: id.to_string(),
    name: id.to_string(),
    version: "1.0.0".to_string(),
    input_schema: ports_schema(input_ports),
    output_schema: ports_schema(output_ports),
    config_schema: json!({ "type": "object" }),
    credential_requests: vec![],
  }
}

/// Emits the configured `data` value as a single item on `out`.
pub struct StaticData {
  descriptor: PluginDescriptor,
}

impl StaticData {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      descriptor: descriptor("static-data", &[], &["out"]),
    })
  }
}

#[async_trait]
impl Plugin for StaticData {
  fn descriptor(&self) -> &PluginDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    _inputs: &NodeOutputs,
    config: &Value,
    _context: &PluginContext,
  ) -> Result<NodeOutputs, PluginError> {
    let data = config.get("data").cloned().unwrap_or(Value::Null);
    Ok(single_port("out", vec![OutputItem::new(data)]))
  }
}

/// Routes each input item to `true` or `false` by comparing its numeric
/// value against the configured `threshold`. The untaken port stays empty,
/// which prunes its subtree.
pub struct IfElse {
  descriptor: PluginDescriptor,
}

impl IfElse {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      descriptor: descriptor("if-else", &["in"], &["true", "false"]),
    })
  }
}

#[async_trait]
impl Plugin for IfElse {
  fn descriptor(&self) -> &PluginDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    inputs: &NodeOutputs,
    config: &Value,
    _context: &PluginContext,
  ) -> Result<NodeOutputs, PluginError> {
    let threshold = config
      .get("threshold")
      .and_then(Value::as_f64)
      .ok_or_else(|| PluginError::Fatal("if-else requires a numeric 'threshold'".to_string()))?;

    let mut outputs = NodeOutputs::new();
    outputs.insert("true".to_string(), vec![]);
    outputs.insert("false".to_string(), vec![]);
    for item in inputs.get("in").map(Vec::as_slice).unwrap_or(&[]) {
      let port = if item.data.as_f64().is_some_and(|v| v > threshold) {
        "true"
      } else {
        "false"
      };
      outputs
        .get_mut(port)
        .expect("declared port")
        .push(item.clone());
    }
    Ok(outputs)
  }
}

/// Expands array inputs into one `body` item per element, tagged with its
/// iteration index, and emits the whole collection once on `done`.
pub struct SplitBatches {
  descriptor: PluginDescriptor,
}

impl SplitBatches {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      descriptor: descriptor("split-batches", &["in"], &["body", "done"]),
    })
  }
}

#[async_trait]
impl Plugin for SplitBatches {
  fn descriptor(&self) -> &PluginDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    inputs: &NodeOutputs,
    _config: &Value,
    _context: &PluginContext,
  ) -> Result<NodeOutputs, PluginError> {
    let mut collection = Vec::new();
    for item in inputs.get("in").map(Vec::as_slice).unwrap_or(&[]) {
      match item.data.as_array() {
        Some(elements) => collection.extend(elements.iter().cloned()),
        None => collection.push(item.data.clone()),
      }
    }

    let body: Vec<OutputItem> = collection
      .iter()
      .enumerate()
      .map(|(idx, element)| OutputItem::new(element.clone()).with_iteration(idx as u64))
      .collect();

    let mut outputs = NodeOutputs::new();
    outputs.insert("body".to_string(), body);
    outputs.insert(
      "done".to_string(),
      vec![OutputItem::new(Value::Array(collection))],
    );
    Ok(outputs)
  }
}

/// Passes every item arriving on `in` through to `out`. Used for fan-in.
pub struct Merge {
  descriptor: PluginDescriptor,
}

impl Merge {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      descriptor: descriptor("merge", &["in"], &["out"]),
    })
  }
}

#[async_trait]
impl Plugin for Merge {
  fn descriptor(&self) -> &PluginDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    inputs: &NodeOutputs,
    _config: &Value,
    _context: &PluginContext,
  ) -> Result<NodeOutputs, PluginError> {
    Ok(single_port(
      "out",
      inputs.get("in").cloned().unwrap_or_default(),
    ))
  }
}

/// Register every built-in plugin.
pub fn register_all(registry: &mut PluginRegistry) {
  registry.register(StaticData::new());
  registry.register(IfElse::new());
  registry.register(SplitBatches::new());
  registry.register(Merge::new());
}
