//! SQLite-backed store.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::types::Json;

use crate::types::{ExecutionRecord, ExecutionStatus, NodeStateEntry};
use crate::{Error, Store};
use async_trait::async_trait;

/// SQLite implementation of [`Store`].
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Connect to the given SQLite URL (e.g. `sqlite://verbena.db?mode=rwc`
  /// or `sqlite::memory:`) and create the schema if needed.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let pool = SqlitePool::connect(url).await?;
    let store = Self { pool };
    store.init_schema().await?;
    Ok(store)
  }

  /// Wrap an existing pool. The schema must already exist.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  async fn init_schema(&self) -> Result<(), Error> {
    sqlx::query(
      r#"
      CREATE TABLE IF NOT EXISTS executions (
        execution_id   TEXT PRIMARY KEY,
        routine_id     TEXT NOT NULL,
        user_id        TEXT NOT NULL,
        status         TEXT NOT NULL,
        trigger_type   TEXT NOT NULL,
        trigger_data   TEXT NOT NULL,
        error          TEXT,
        execution_path TEXT,
        started_at     TEXT NOT NULL,
        completed_at   TEXT
      )
      "#,
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      r#"
      CREATE TABLE IF NOT EXISTS node_states (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id TEXT NOT NULL,
        node_id      TEXT NOT NULL,
        iteration    INTEGER,
        status       TEXT NOT NULL,
        started_at   TEXT NOT NULL,
        completed_at TEXT,
        duration_ms  INTEGER,
        output       TEXT,
        error        TEXT
      )
      "#,
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      r#"
      CREATE UNIQUE INDEX IF NOT EXISTS node_states_key
      ON node_states (execution_id, node_id, COALESCE(iteration, -1))
      "#,
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_execution(&self, execution: &ExecutionRecord) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO executions
        (execution_id, routine_id, user_id, status, trigger_type, trigger_data,
         error, execution_path, started_at, completed_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&execution.execution_id)
    .bind(&execution.routine_id)
    .bind(&execution.user_id)
    .bind(execution.status)
    .bind(&execution.trigger_type)
    .bind(&execution.trigger_data)
    .bind(&execution.error)
    .bind(&execution.execution_path)
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, Error> {
    sqlx::query_as::<_, ExecutionRecord>(
      "SELECT * FROM executions WHERE execution_id = ?",
    )
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("execution '{}'", execution_id)))
  }

  async fn update_execution(
    &self,
    execution_id: &str,
    status: ExecutionStatus,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    execution_path: Option<serde_json::Value>,
  ) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      UPDATE executions
      SET status = ?,
          completed_at = COALESCE(?, completed_at),
          error = COALESCE(?, error),
          execution_path = COALESCE(?, execution_path)
      WHERE execution_id = ?
      "#,
    )
    .bind(status)
    .bind(completed_at)
    .bind(error)
    .bind(execution_path.map(Json))
    .bind(execution_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(format!("execution '{}'", execution_id)));
    }
    Ok(())
  }

  async fn list_executions(&self, routine_id: &str) -> Result<Vec<ExecutionRecord>, Error> {
    Ok(
      sqlx::query_as::<_, ExecutionRecord>(
        "SELECT * FROM executions WHERE routine_id = ? ORDER BY started_at DESC",
      )
      .bind(routine_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }

  async fn upsert_node_state(&self, entry: &NodeStateEntry) -> Result<(), Error> {
    // Update-in-place first: a `running` row is replaced by its terminal
    // entry; duration is derived from the stored start time when the caller
    // did not provide one.
    let updated = sqlx::query(
      r#"
      UPDATE node_states
      SET status = ?,
          completed_at = COALESCE(?, completed_at),
          duration_ms = COALESCE(
            ?,
            CAST((julianday(?) - julianday(started_at)) * 86400000.0 AS INTEGER)
          ),
          output = COALESCE(?, output),
          error = COALESCE(?, error)
      WHERE execution_id = ? AND node_id = ? AND COALESCE(iteration, -1) = COALESCE(?, -1)
      "#,
    )
    .bind(entry.status)
    .bind(entry.completed_at)
    .bind(entry.duration_ms)
    .bind(entry.completed_at)
    .bind(&entry.output)
    .bind(&entry.error)
    .bind(&entry.execution_id)
    .bind(&entry.node_id)
    .bind(entry.iteration)
    .execute(&self.pool)
    .await?;

    if updated.rows_affected() > 0 {
      return Ok(());
    }

    sqlx::query(
      r#"
      INSERT INTO node_states
        (execution_id, node_id, iteration, status, started_at, completed_at,
         duration_ms, output, error)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&entry.execution_id)
    .bind(&entry.node_id)
    .bind(entry.iteration)
    .bind(entry.status)
    .bind(entry.started_at)
    .bind(entry.completed_at)
    .bind(entry.duration_ms)
    .bind(&entry.output)
    .bind(&entry.error)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn list_node_states(&self, execution_id: &str) -> Result<Vec<NodeStateEntry>, Error> {
    Ok(
      sqlx::query_as::<_, NodeStateEntry>(
        "SELECT execution_id, node_id, iteration, status, started_at, completed_at,
                duration_ms, output, error
         FROM node_states WHERE execution_id = ? ORDER BY id",
      )
      .bind(execution_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }
}
