//! Verbena Store
//!
//! This crate provides the storage trait and implementations for routine
//! executions and their node-state timelines. Data is persisted to a
//! database (SQLite).
//!
//! The [`Store`] trait defines operations for:
//! - Creating and updating execution records
//! - Upserting node-state timeline entries
//! - Querying execution history
//!
//! [`StoreSink`] adapts a [`Store`] to the engine's observability sink:
//! every write is retried a bounded number of times and then dropped with a
//! warning - persistence never fails an execution.

mod sink;
mod sqlite;
mod types;

pub use sink::StoreSink;
pub use sqlite::SqliteStore;
pub use types::{ExecutionRecord, ExecutionStatus, NodeStateEntry, NodeStateStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage trait for routine executions and node-state timelines.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a new execution record.
  async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), Error>;

  /// Get an execution by ID.
  async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, Error>;

  /// Update the terminal fields of an execution.
  async fn update_execution(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    execution_path: Option<serde_json::Value>,
  ) -> Result<(), Error>;

  /// List executions for a routine, newest first.
  async fn list_executions(&self, routine_id: &str) -> Result<Vec<ExecutionRecord>, Error>;

  /// Insert or update a node-state entry.
  ///
  /// Entries are keyed by `(execution_id, node_id, iteration)`: a `running`
  /// entry is updated in place when the terminal entry arrives, and repeated
  /// terminal writes are idempotent.
  async fn upsert_node_state(&self, entry: &NodeStateEntry) -> Result<(), Error>;

  /// List node-state entries for an execution in insertion order.
  async fn list_node_states(&self, execution_id: &str) -> Result<Vec<NodeStateEntry>, Error>;
}
