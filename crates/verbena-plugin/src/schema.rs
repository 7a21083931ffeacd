//! JSON Schema validation for plugin inputs and outputs.
//!
//! Schemas are structural; validation failures carry the instance path so the
//! persisted error message points at the offending field.

use jsonschema::JSONSchema;

/// Validate `value` against `schema`, returning every violation message.
///
/// An invalid schema is itself reported as a violation - the plugin declared
/// it, so the error belongs to the plugin's invocation.
pub fn validate_against_schema(
  schema: &serde_json::Value,
  value: &serde_json::Value,
) -> Result<(), Vec<String>> {
  let compiled = match JSONSchema::compile(schema) {
    Ok(compiled) => compiled,
    Err(e) => return Err(vec![format!("invalid schema: {}", e)]),
  };

  // Collect messages while the compiled schema is still alive; the error
  // iterator borrows it.
  let messages = match compiled.validate(value) {
    Ok(()) => None,
    Err(errors) => Some(
      errors
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect::<Vec<String>>(),
    ),
  };

  match messages {
    None => Ok(()),
    Some(messages) => Err(messages),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn conforming_value_passes() {
    let schema = json!({
      "type": "object",
      "properties": { "count": { "type": "integer" } },
      "required": ["count"]
    });
    assert!(validate_against_schema(&schema, &json!({ "count": 3 })).is_ok());
  }

  #[test]
  fn violation_names_the_path() {
    let schema = json!({
      "type": "object",
      "properties": { "count": { "type": "integer" } },
      "required": ["count"]
    });
    let errors = validate_against_schema(&schema, &json!({ "count": "three" })).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("/count"), "got: {}", errors[0]);
  }

  #[test]
  fn empty_schema_accepts_anything() {
    let schema = json!({});
    assert!(validate_against_schema(&schema, &json!([1, "two", null])).is_ok());
  }
}
