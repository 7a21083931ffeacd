use serde::{Deserialize, Serialize};

/// Declared type of a routine variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
  String,
  Number,
  Boolean,
  Json,
}

/// A routine variable, frozen at execution start.
///
/// Referenced from node parameters as `{{ vars.<name> }}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
  pub name: String,
  #[serde(rename = "type")]
  pub variable_type: VariableType,
  pub value: serde_json::Value,
}

impl VariableDef {
  /// Check that the value conforms to the declared type.
  ///
  /// `Json` accepts any value, including null.
  pub fn value_matches_type(&self) -> bool {
    match self.variable_type {
      VariableType::String => self.value.is_string(),
      VariableType::Number => self.value.is_number(),
      VariableType::Boolean => self.value.is_boolean(),
      VariableType::Json => true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn value_type_conformance() {
    let var = VariableDef {
      name: "count".to_string(),
      variable_type: VariableType::Number,
      value: json!(3),
    };
    assert!(var.value_matches_type());

    let var = VariableDef {
      name: "count".to_string(),
      variable_type: VariableType::Number,
      value: json!("three"),
    };
    assert!(!var.value_matches_type());

    let var = VariableDef {
      name: "blob".to_string(),
      variable_type: VariableType::Json,
      value: json!({ "nested": [1, 2] }),
    };
    assert!(var.value_matches_type());
  }

  #[test]
  fn type_tag_round_trips() {
    let var = VariableDef {
      name: "flag".to_string(),
      variable_type: VariableType::Boolean,
      value: json!(true),
    };
    let text = serde_json::to_string(&var).unwrap();
    assert!(text.contains(r#""type":"boolean""#));
    let back: VariableDef = serde_json::from_str(&text).unwrap();
    assert_eq!(back, var);
  }
}
