use serde::{Deserialize, Serialize};

/// A named credential a plugin needs at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRequest {
  /// Alias the plugin uses to look the credential up in its context.
  pub alias: String,
  #[serde(default)]
  pub required: bool,
}

/// Static description of a plugin: identity plus declared schemas.
///
/// The input and output schemas are JSON Schemas whose top-level `properties`
/// double as the plugin's port declarations - one property per port, each an
/// array of items. The config schema describes the node `parameters` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
  pub id: String,
  pub name: String,
  pub version: String,
  pub input_schema: serde_json::Value,
  pub output_schema: serde_json::Value,
  pub config_schema: serde_json::Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub credential_requests: Vec<CredentialRequest>,
}

impl PluginDescriptor {
  /// Port names declared by the input schema.
  pub fn input_ports(&self) -> Vec<&str> {
    schema_ports(&self.input_schema)
  }

  /// Port names declared by the output schema.
  pub fn output_ports(&self) -> Vec<&str> {
    schema_ports(&self.output_schema)
  }

  /// Whether this plugin drives loop iteration: it declares exactly the
  /// `body` and `done` output ports.
  pub fn is_loop(&self) -> bool {
    let mut ports = self.output_ports();
    ports.sort_unstable();
    ports == ["body", "done"]
  }
}

fn schema_ports(schema: &serde_json::Value) -> Vec<&str> {
  let mut ports: Vec<&str> = schema
    .get("properties")
    .and_then(|p| p.as_object())
    .map(|props| props.keys().map(String::as_str).collect())
    .unwrap_or_default();
  ports.sort_unstable();
  ports
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn ports_come_from_schema_properties() {
    let descriptor = PluginDescriptor {
      id: "if-else".to_string(),
      name: "If/Else".to_string(),
      version: "1.0.0".to_string(),
      input_schema: json!({ "type": "object", "properties": { "in": { "type": "array" } } }),
      output_schema: json!({
        "type": "object",
        "properties": {
          "true": { "type": "array" },
          "false": { "type": "array" }
        }
      }),
      config_schema: json!({ "type": "object" }),
      credential_requests: vec![],
    };

    assert_eq!(descriptor.input_ports(), ["in"]);
    assert_eq!(descriptor.output_ports(), ["false", "true"]);
    assert!(!descriptor.is_loop());
  }

  #[test]
  fn body_done_ports_mark_a_loop() {
    let descriptor = PluginDescriptor {
      id: "split-batches".to_string(),
      name: "Split in Batches".to_string(),
      version: "1.0.0".to_string(),
      input_schema: json!({ "properties": { "in": {} } }),
      output_schema: json!({ "properties": { "body": {}, "done": {} } }),
      config_schema: json!({}),
      credential_requests: vec![],
    };
    assert!(descriptor.is_loop());
  }
}
