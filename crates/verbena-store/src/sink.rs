//! Bridge from the engine's observability sink to a [`Store`].

use std::time::Duration;

use async_trait::async_trait;
use sqlx::types::Json;
use tracing::warn;
use verbena_engine::{ExecutionEvent, ExecutionSink};

use crate::types::{ExecutionRecord, ExecutionStatus, NodeStateEntry, NodeStateStatus};
use crate::{Error, Store};

/// Persists execution events through a [`Store`].
///
/// Writes are best-effort: each event is retried a bounded number of times
/// with a short backoff and then dropped with a warning. Observability never
/// gates execution correctness.
pub struct StoreSink<S: Store> {
  store: S,
  max_attempts: u32,
}

impl<S: Store> StoreSink<S> {
  pub fn new(store: S) -> Self {
    Self {
      store,
      max_attempts: 3,
    }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  async fn apply(&self, event: &ExecutionEvent) -> Result<(), Error> {
    match event {
      ExecutionEvent::ExecutionCreated {
        execution_id,
        routine_id,
        user_id,
        trigger_type,
        trigger_data,
        started_at,
      } => {
        self
          .store
          .create_execution(&ExecutionRecord {
            execution_id: execution_id.clone(),
            routine_id: routine_id.clone(),
            user_id: user_id.clone(),
            status: ExecutionStatus::Running,
            trigger_type: trigger_type.clone(),
            trigger_data: Json(trigger_data.clone()),
            error: None,
            execution_path: None,
            started_at: *started_at,
            completed_at: None,
          })
          .await
      }

      ExecutionEvent::ExecutionUpdated {
        execution_id,
        status,
        completed_at,
        error,
        execution_path,
      } => {
        let path = execution_path
          .as_ref()
          .and_then(|p| serde_json::to_value(p).ok());
        self
          .store
          .update_execution(
            execution_id,
            convert_status(*status),
            *completed_at,
            error.clone(),
            path,
          )
          .await
      }

      ExecutionEvent::NodeStarted {
        execution_id,
        node_id,
        iteration,
        started_at,
      } => {
        self
          .store
          .upsert_node_state(&NodeStateEntry {
            execution_id: execution_id.clone(),
            node_id: node_id.clone(),
            iteration: iteration.map(|i| i as i64),
            status: NodeStateStatus::Running,
            started_at: *started_at,
            completed_at: None,
            duration_ms: None,
            output: None,
            error: None,
          })
          .await
      }

      ExecutionEvent::NodeCompleted {
        execution_id,
        node_id,
        iteration,
        output,
        completed_at,
      } => {
        self
          .store
          .upsert_node_state(&NodeStateEntry {
            execution_id: execution_id.clone(),
            node_id: node_id.clone(),
            iteration: iteration.map(|i| i as i64),
            status: NodeStateStatus::Completed,
            started_at: *completed_at,
            completed_at: Some(*completed_at),
            duration_ms: None,
            output: Some(Json(output.clone())),
            error: None,
          })
          .await
      }

      ExecutionEvent::NodeFailed {
        execution_id,
        node_id,
        iteration,
        error,
        completed_at,
      } => {
        self
          .store
          .upsert_node_state(&NodeStateEntry {
            execution_id: execution_id.clone(),
            node_id: node_id.clone(),
            iteration: iteration.map(|i| i as i64),
            status: NodeStateStatus::Failed,
            started_at: *completed_at,
            completed_at: Some(*completed_at),
            duration_ms: None,
            output: None,
            error: Some(error.clone()),
          })
          .await
      }
    }
  }
}

fn convert_status(status: verbena_engine::ExecutionStatus) -> ExecutionStatus {
  match status {
    verbena_engine::ExecutionStatus::Running => ExecutionStatus::Running,
    verbena_engine::ExecutionStatus::Completed => ExecutionStatus::Completed,
    verbena_engine::ExecutionStatus::Failed => ExecutionStatus::Failed,
    verbena_engine::ExecutionStatus::Cancelled => ExecutionStatus::Cancelled,
    verbena_engine::ExecutionStatus::Timeout => ExecutionStatus::Timeout,
  }
}

#[async_trait]
impl<S: Store> ExecutionSink for StoreSink<S> {
  async fn emit(&self, event: ExecutionEvent) {
    let mut attempt = 0;
    loop {
      attempt += 1;
      match self.apply(&event).await {
        Ok(()) => return,
        Err(e) if attempt < self.max_attempts => {
          warn!(attempt, error = %e, "store write failed, retrying");
          tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
        }
        Err(e) => {
          warn!(error = %e, "dropping execution event after retries");
          return;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::SqliteStore;
  use chrono::Utc;
  use serde_json::json;

  #[tokio::test]
  async fn events_land_in_the_store() {
    let sink = StoreSink::new(SqliteStore::connect("sqlite::memory:").await.unwrap());

    sink
      .emit(ExecutionEvent::ExecutionCreated {
        execution_id: "x1".to_string(),
        routine_id: "r1".to_string(),
        user_id: "u1".to_string(),
        trigger_type: "manual".to_string(),
        trigger_data: json!({}),
        started_at: Utc::now(),
      })
      .await;
    sink
      .emit(ExecutionEvent::NodeStarted {
        execution_id: "x1".to_string(),
        node_id: "A".to_string(),
        iteration: None,
        started_at: Utc::now(),
      })
      .await;
    sink
      .emit(ExecutionEvent::NodeCompleted {
        execution_id: "x1".to_string(),
        node_id: "A".to_string(),
        iteration: None,
        output: json!({ "out": [{ "data": 1 }] }),
        completed_at: Utc::now(),
      })
      .await;
    sink
      .emit(ExecutionEvent::ExecutionUpdated {
        execution_id: "x1".to_string(),
        status: verbena_engine::ExecutionStatus::Completed,
        completed_at: Some(Utc::now()),
        error: None,
        execution_path: Some(vec![]),
      })
      .await;

    let execution = sink.store().get_execution("x1").await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let states = sink.store().list_node_states("x1").await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status, NodeStateStatus::Completed);
  }
}
