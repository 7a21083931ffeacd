//! Execution events and sinks for observability.
//!
//! Events are emitted during execution so consumers can persist timelines,
//! stream progress to UIs, or ignore them entirely. Emission is best-effort:
//! a sink must never fail the execution - bounded retry and error swallowing
//! are the sink implementation's responsibility.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::PathEntry;

/// Terminal and transitional statuses of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Running,
  Completed,
  Failed,
  Cancelled,
  Timeout,
}

impl ExecutionStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Running)
  }
}

/// Events emitted during routine execution.
///
/// Events for a single `(node_id, iteration)` are idempotent on the sink
/// side, keyed by `(execution_id, node_id, iteration, status)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  ExecutionCreated {
    execution_id: String,
    routine_id: String,
    user_id: String,
    trigger_type: String,
    trigger_data: serde_json::Value,
    started_at: DateTime<Utc>,
  },

  NodeStarted {
    execution_id: String,
    node_id: String,
    iteration: Option<u64>,
    started_at: DateTime<Utc>,
  },

  NodeCompleted {
    execution_id: String,
    node_id: String,
    iteration: Option<u64>,
    output: serde_json::Value,
    completed_at: DateTime<Utc>,
  },

  NodeFailed {
    execution_id: String,
    node_id: String,
    iteration: Option<u64>,
    error: String,
    completed_at: DateTime<Utc>,
  },

  ExecutionUpdated {
    execution_id: String,
    status: ExecutionStatus,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    execution_path: Option<Vec<PathEntry>>,
  },
}

/// Trait for receiving execution events.
///
/// The engine awaits `emit` but ignores its effects on correctness; a slow
/// or failing sink delays the execution at most, never fails it.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
  async fn emit(&self, event: ExecutionEvent);
}

/// A sink that discards all events. Useful for tests.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl ExecutionSink for NoopSink {
  async fn emit(&self, _event: ExecutionEvent) {}
}

/// A sink that forwards events to an unbounded channel.
///
/// NOTE: unbounded so a slow consumer cannot stall the engine. Event volume
/// is low (a handful per node), so memory growth is unlikely in practice.
#[derive(Debug, Clone)]
pub struct ChannelSink {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelSink {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

#[async_trait]
impl ExecutionSink for ChannelSink {
  async fn emit(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
