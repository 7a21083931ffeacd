//! Task identity: loop contexts and context keys.

use serde::{Deserialize, Serialize};

/// One level of loop nesting on the active path.
///
/// Pushed when scheduling downstream of a loop node's `body` edge, popped for
/// the `done` branch. The accumulator is opaque per-iteration state the
/// engine carries but never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopFrame {
  pub edge_id: String,
  pub iteration: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub accumulator: Option<serde_json::Value>,
}

/// Stack of loop frames identifying a position inside nested loops.
///
/// The empty stack is the root context; its key is the empty string, so a
/// node outside any loop is identified by its id alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopContext {
  frames: Vec<LoopFrame>,
}

impl LoopContext {
  pub fn root() -> Self {
    Self::default()
  }

  pub fn is_root(&self) -> bool {
    self.frames.is_empty()
  }

  pub fn frames(&self) -> &[LoopFrame] {
    &self.frames
  }

  /// New context with `frame` pushed on top.
  pub fn push(&self, frame: LoopFrame) -> Self {
    let mut frames = self.frames.clone();
    frames.push(frame);
    Self { frames }
  }

  /// New context with the innermost frame popped. The root context is its
  /// own parent.
  pub fn parent(&self) -> Self {
    let mut frames = self.frames.clone();
    frames.pop();
    Self { frames }
  }

  pub fn innermost(&self) -> Option<&LoopFrame> {
    self.frames.last()
  }

  pub fn frame_for_edge(&self, edge_id: &str) -> Option<&LoopFrame> {
    self.frames.iter().rev().find(|f| f.edge_id == edge_id)
  }

  /// Whether `self` extends `prefix` frame-for-frame from the bottom.
  pub fn starts_with(&self, prefix: &LoopContext) -> bool {
    self.frames.len() >= prefix.frames.len()
      && self
        .frames
        .iter()
        .zip(prefix.frames.iter())
        .all(|(a, b)| a.edge_id == b.edge_id && a.iteration == b.iteration)
  }

  /// Canonical string form: `edgeId:iteration` segments joined by `/`.
  pub fn context_key(&self) -> String {
    self
      .frames
      .iter()
      .map(|f| format!("{}:{}", f.edge_id, f.iteration))
      .collect::<Vec<_>>()
      .join("/")
  }
}

/// Unique identity of one unit of work: `(node_id, context_key)`.
///
/// `Ord` gives the lexicographic tie-break the scheduler uses for
/// deterministic emission order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
  pub node_id: String,
  pub context_key: String,
}

impl TaskKey {
  pub fn new(node_id: impl Into<String>, context_key: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      context_key: context_key.into(),
    }
  }
}

impl std::fmt::Display for TaskKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.context_key.is_empty() {
      write!(f, "{}", self.node_id)
    } else {
      write!(f, "{}@{}", self.node_id, self.context_key)
    }
  }
}

/// A schedulable unit: a node under a loop context.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionTask {
  pub node_id: String,
  pub context: LoopContext,
}

impl ExecutionTask {
  pub fn new(node_id: impl Into<String>, context: LoopContext) -> Self {
    Self {
      node_id: node_id.into(),
      context,
    }
  }

  pub fn key(&self) -> TaskKey {
    TaskKey::new(self.node_id.clone(), self.context.context_key())
  }
}
