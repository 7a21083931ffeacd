use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A node definition: one plugin invocation within a routine.
///
/// `parameters` is an arbitrary nested JSON value whose shape is declared by
/// the plugin's config schema - the engine is agnostic to it and only walks
/// it for `{{ … }}` expression resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub id: String,
  pub plugin_id: String,
  #[serde(default)]
  pub label: String,
  #[serde(default)]
  pub parameters: serde_json::Value,
  /// Credential alias → credential id, resolved through the credential store
  /// at invocation time.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub credentials: HashMap<String, String>,
}
