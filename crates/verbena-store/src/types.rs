use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Status of a routine execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Running,
  Completed,
  Failed,
  Cancelled,
  Timeout,
}

/// Status of one node-state timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NodeStateStatus {
  Running,
  Completed,
  Failed,
}

/// A routine execution as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
  pub execution_id: String,
  pub routine_id: String,
  pub user_id: String,
  pub status: ExecutionStatus,
  pub trigger_type: String,
  pub trigger_data: Json<serde_json::Value>,
  pub error: Option<String>,
  pub execution_path: Option<Json<serde_json::Value>>,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// One node-state timeline entry.
///
/// `iteration` is None for nodes outside any loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct NodeStateEntry {
  pub execution_id: String,
  pub node_id: String,
  pub iteration: Option<i64>,
  pub status: NodeStateStatus,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_ms: Option<i64>,
  pub output: Option<Json<serde_json::Value>>,
  pub error: Option<String>,
}
