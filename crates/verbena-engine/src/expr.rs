//! Expression resolution for node parameters.
//!
//! Parameters may embed `{{ … }}` references resolved just before plugin
//! invocation against the execution's context:
//!
//! - `{{ vars.<name> }}` - frozen routine variables
//! - `{{ nodes.<id>.<port>.<path> }}` - the most recent output on `<port>`
//!   for node `<id>` visible from the current loop context
//! - `{{ trigger.data.<path> }}` - the trigger payload
//! - `{{ execution.id }}`, `{{ execution.routine_id }}`,
//!   `{{ execution.started_at }}`
//!
//! A string that is exactly one expression resolves to the raw value with its
//! type preserved; references embedded in a larger string are coerced to
//! string form and concatenated. A missing reference resolves to null (whole
//! value) or the empty string (interpolated) - never the literal template.
//! Values without templates pass through untouched.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use verbena_config::TriggerPayload;

use crate::state::ExecutionState;
use crate::task::LoopContext;

fn template_regex() -> &'static Regex {
  static TEMPLATE: OnceLock<Regex> = OnceLock::new();
  // Interior whitespace (spaces, tabs, newlines) is tolerated around the path.
  TEMPLATE.get_or_init(|| Regex::new(r"(?s)\{\{\s*(.+?)\s*\}\}").expect("template regex"))
}

/// Identity of the running execution, exposed as the `execution` root.
#[derive(Debug, Clone)]
pub struct ExecutionInfo {
  pub id: String,
  pub routine_id: String,
  pub started_at: DateTime<Utc>,
}

/// Everything an expression can reference.
pub struct ExpressionContext<'a> {
  pub state: &'a ExecutionState,
  pub context: &'a LoopContext,
  pub variables: &'a HashMap<String, Value>,
  pub trigger: &'a TriggerPayload,
  pub execution: &'a ExecutionInfo,
}

/// Resolve every `{{ … }}` reference in `value`, producing a new value.
/// The input is never mutated.
pub fn resolve_parameters(value: &Value, ctx: &ExpressionContext<'_>) -> Value {
  match value {
    Value::String(s) => resolve_string(s, ctx),
    Value::Array(items) => Value::Array(items.iter().map(|v| resolve_parameters(v, ctx)).collect()),
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), resolve_parameters(v, ctx)))
        .collect(),
    ),
    other => other.clone(),
  }
}

fn resolve_string(s: &str, ctx: &ExpressionContext<'_>) -> Value {
  let regex = template_regex();

  // Whole-value expression: preserve the resolved type.
  if let Some(captures) = regex.captures(s) {
    let whole = captures.get(0).expect("match 0");
    if whole.start() == 0 && whole.end() == s.len() {
      let path = captures.get(1).expect("capture 1").as_str();
      return resolve_path(path, ctx).unwrap_or(Value::Null);
    }
  } else {
    return Value::String(s.to_string());
  }

  // Interpolation: stringify each reference in place.
  let replaced = regex.replace_all(s, |captures: &regex::Captures<'_>| {
    let path = captures.get(1).expect("capture 1").as_str();
    resolve_path(path, ctx).map(stringify).unwrap_or_default()
  });
  Value::String(replaced.into_owned())
}

fn stringify(value: Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s,
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    other => serde_json::to_string(&other).unwrap_or_default(),
  }
}

#[derive(Debug, PartialEq)]
enum PathSeg {
  Key(String),
  Index(usize),
}

/// Parse a dotted path with optional bracket indexing: `a.b[0].c`,
/// `items.0.name`, `vars["spaced key"]`.
fn parse_path(expr: &str) -> Option<Vec<PathSeg>> {
  let mut segs = Vec::new();
  let mut chars = expr.char_indices().peekable();
  let mut current = String::new();

  while let Some((_, ch)) = chars.next() {
    match ch {
      '.' => {
        if current.is_empty() {
          return None;
        }
        segs.push(PathSeg::Key(std::mem::take(&mut current)));
      }
      '[' => {
        if !current.is_empty() {
          segs.push(PathSeg::Key(std::mem::take(&mut current)));
        }
        let mut inner = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == ']' {
            closed = true;
            break;
          }
          inner.push(c);
        }
        if !closed || inner.is_empty() {
          return None;
        }
        let inner = inner.trim();
        if let Some(quoted) = inner
          .strip_prefix('"')
          .and_then(|r| r.strip_suffix('"'))
          .or_else(|| inner.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))
        {
          segs.push(PathSeg::Key(quoted.to_string()));
        } else {
          segs.push(PathSeg::Index(inner.parse().ok()?));
        }
        // A dot after the bracket is optional: `a[0].b` and `a[0]b` - only
        // the former is meaningful, so consume a following dot if present.
        if let Some(&(_, '.')) = chars.peek() {
          chars.next();
        }
      }
      _ => current.push(ch),
    }
  }
  if !current.is_empty() {
    segs.push(PathSeg::Key(current));
  }
  if segs.is_empty() { None } else { Some(segs) }
}

fn resolve_path(expr: &str, ctx: &ExpressionContext<'_>) -> Option<Value> {
  let segs = parse_path(expr)?;
  let (root, rest) = segs.split_first()?;
  let root = match root {
    PathSeg::Key(k) => k.as_str(),
    PathSeg::Index(_) => return None,
  };

  match root {
    "vars" => {
      let (name, rest) = rest.split_first()?;
      let name = match name {
        PathSeg::Key(k) => k.as_str(),
        PathSeg::Index(_) => return None,
      };
      drill(ctx.variables.get(name)?.clone(), rest)
    }
    "trigger" => {
      let payload = serde_json::to_value(ctx.trigger).ok()?;
      drill(payload, rest)
    }
    "execution" => {
      let info = serde_json::json!({
        "id": ctx.execution.id,
        "routine_id": ctx.execution.routine_id,
        "started_at": ctx.execution.started_at.to_rfc3339(),
      });
      drill(info, rest)
    }
    "nodes" => resolve_node_path(rest, ctx),
    _ => None,
  }
}

/// `nodes.<id>.<port>[.<path>]` - drills into the port's items. A bracket or
/// numeric segment right after the port selects an item by position;
/// otherwise the first item's data is used.
fn resolve_node_path(segs: &[PathSeg], ctx: &ExpressionContext<'_>) -> Option<Value> {
  let (node_id, rest) = segs.split_first()?;
  let node_id = match node_id {
    PathSeg::Key(k) => k.as_str(),
    PathSeg::Index(_) => return None,
  };
  let (port, rest) = rest.split_first()?;
  let port = match port {
    PathSeg::Key(k) => k.as_str(),
    PathSeg::Index(_) => return None,
  };

  let record = ctx.state.find_record(node_id, ctx.context)?;
  let items = record.outputs.get(port)?;

  match rest.split_first() {
    None => Some(Value::Array(items.iter().map(|i| i.data.clone()).collect())),
    Some((PathSeg::Index(i), tail)) => drill(items.get(*i)?.data.clone(), tail),
    Some(_) => drill(items.first()?.data.clone(), rest),
  }
}

fn drill(value: Value, segs: &[PathSeg]) -> Option<Value> {
  let mut current = value;
  for seg in segs {
    current = match (seg, current) {
      (PathSeg::Key(k), Value::Object(mut map)) => map.remove(k)?,
      // Numeric dot-segments index arrays: `items.0.name`.
      (PathSeg::Key(k), Value::Array(mut arr)) => {
        let idx: usize = k.parse().ok()?;
        if idx >= arr.len() {
          return None;
        }
        arr.swap_remove(idx)
      }
      (PathSeg::Index(i), Value::Array(mut arr)) => {
        if *i >= arr.len() {
          return None;
        }
        arr.swap_remove(*i)
      }
      _ => return None,
    };
  }
  Some(current)
}
