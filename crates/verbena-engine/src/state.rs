//! Per-execution state: node results, the execution path, and errors.
//!
//! All writes happen on the runner task between its suspension points; the
//! state is single-writer by construction and needs no locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use verbena_plugin::NodeOutputs;

use crate::task::{LoopContext, TaskKey};

/// Lifecycle of one `(node, context)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Running,
  Completed,
  Failed,
  Skipped,
}

impl NodeStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Running)
  }
}

/// Result record for one `(node, context)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
  pub status: NodeStatus,
  #[serde(default)]
  pub outputs: NodeOutputs,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// One completed step in the ordered execution path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
  pub node_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub iteration: Option<u64>,
}

/// A recorded node failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
  pub node_id: String,
  pub kind: String,
  pub message: String,
}

/// State for one execution: results keyed by `(node_id, context_key)`, an
/// append-only execution path, and the aggregated error list.
#[derive(Debug, Default)]
pub struct ExecutionState {
  results: HashMap<TaskKey, NodeRecord>,
  execution_path: Vec<PathEntry>,
  errors: Vec<NodeError>,
}

impl ExecutionState {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark a task running. Keeps the original `started_at` if called twice.
  pub fn record_running(&mut self, key: TaskKey) {
    self.results.entry(key).or_insert(NodeRecord {
      status: NodeStatus::Running,
      outputs: NodeOutputs::new(),
      started_at: Utc::now(),
      completed_at: None,
      error: None,
    });
  }

  /// Record a terminal success and append it to the execution path.
  ///
  /// A second terminal write for the same key is a scheduler bug; the first
  /// record wins and the duplicate is reported to the caller.
  pub fn record_completed(
    &mut self,
    key: TaskKey,
    iteration: Option<u64>,
    outputs: NodeOutputs,
  ) -> Result<(), TaskKey> {
    if self.results.get(&key).is_some_and(|r| r.status.is_terminal()) {
      return Err(key);
    }
    let record = self.results.entry(key.clone()).or_insert(NodeRecord {
      status: NodeStatus::Running,
      outputs: NodeOutputs::new(),
      started_at: Utc::now(),
      completed_at: None,
      error: None,
    });
    record.status = NodeStatus::Completed;
    record.outputs = outputs;
    record.completed_at = Some(Utc::now());
    self.execution_path.push(PathEntry {
      node_id: key.node_id,
      iteration,
    });
    Ok(())
  }

  /// Record a terminal failure.
  pub fn record_failed(&mut self, key: TaskKey, kind: &str, message: String) {
    let record = self.results.entry(key.clone()).or_insert(NodeRecord {
      status: NodeStatus::Running,
      outputs: NodeOutputs::new(),
      started_at: Utc::now(),
      completed_at: None,
      error: None,
    });
    record.status = NodeStatus::Failed;
    record.completed_at = Some(Utc::now());
    record.error = Some(message.clone());
    self.errors.push(NodeError {
      node_id: key.node_id,
      kind: kind.to_string(),
      message,
    });
  }

  /// Record a pruned `(node, context)` pair. Skips are bookkeeping only and
  /// do not appear on the execution path.
  pub fn record_skipped(&mut self, key: TaskKey) {
    let now = Utc::now();
    self.results.insert(
      key,
      NodeRecord {
        status: NodeStatus::Skipped,
        outputs: NodeOutputs::new(),
        started_at: now,
        completed_at: Some(now),
        error: None,
      },
    );
  }

  pub fn record(&self, key: &TaskKey) -> Option<&NodeRecord> {
    self.results.get(key)
  }

  /// Find the most recent record for `node_id` visible from `context`,
  /// walking from the full stack outward to the root. This is how a node
  /// inside a loop sees producers that ran outside it.
  pub fn find_record(&self, node_id: &str, context: &LoopContext) -> Option<&NodeRecord> {
    let mut ctx = context.clone();
    loop {
      let key = TaskKey::new(node_id, ctx.context_key());
      if let Some(record) = self.results.get(&key) {
        return Some(record);
      }
      if ctx.is_root() {
        return None;
      }
      ctx = ctx.parent();
    }
  }

  /// All records, keyed by task.
  pub fn results(&self) -> impl Iterator<Item = (&TaskKey, &NodeRecord)> {
    self.results.iter()
  }

  pub fn execution_path(&self) -> &[PathEntry] {
    &self.execution_path
  }

  pub fn errors(&self) -> &[NodeError] {
    &self.errors
  }

  /// Keys with a terminal `Completed` record, for invariant checks.
  pub fn completed_keys(&self) -> Vec<&TaskKey> {
    let mut keys: Vec<&TaskKey> = self
      .results
      .iter()
      .filter(|(_, r)| r.status == NodeStatus::Completed)
      .map(|(k, _)| k)
      .collect();
    keys.sort();
    keys
  }
}
