//! The durable driver: the entry point a durable runtime invokes.
//!
//! `run` owns the execution lifecycle: validate, open the execution record,
//! drive the task runner to quiescence, and write the terminal status. On a
//! fatal node failure the error is returned to the caller after the terminal
//! status is emitted, so the hosting runtime records the failure too.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;
use verbena_config::RoutineInput;
use verbena_plugin::{CredentialStore, PluginRegistry};
use verbena_routine::{validate, ExecutionGraph};

use crate::activity::Heartbeat;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionSink, ExecutionStatus};
use crate::iterator::GraphIterator;
use crate::runner::{ExecutionMeta, TaskRunner};
use crate::state::{ExecutionState, PathEntry};

/// External collaborators the engine calls out to.
pub struct EngineDeps {
  pub registry: Arc<PluginRegistry>,
  pub credentials: Arc<dyn CredentialStore>,
  pub sink: Arc<dyn ExecutionSink>,
  pub heartbeat: Arc<dyn Heartbeat>,
}

/// Terminal result of one execution.
#[derive(Debug)]
pub struct ExecutionOutcome {
  pub execution_id: String,
  pub status: ExecutionStatus,
  pub execution_path: Vec<PathEntry>,
  pub state: ExecutionState,
}

/// Execute a routine to a terminal state.
///
/// Returns `Ok` for completed, cancelled, and timed-out executions; returns
/// `Err` for validation failures and fatal node failures so the durable
/// runtime records them (the terminal status is emitted either way).
#[instrument(name = "routine_execute", skip_all, fields(routine_id = %input.routine_id))]
pub async fn run(
  deps: &EngineDeps,
  config: &EngineConfig,
  input: &RoutineInput,
  cancel: CancellationToken,
) -> Result<ExecutionOutcome, EngineError> {
  let execution_id = Uuid::new_v4().to_string();
  let started_at = Utc::now();

  let report = validate(input);
  for warning in &report.warnings {
    info!(routine_id = %input.routine_id, warning = %warning, "validation warning");
  }
  if !report.valid() {
    let err = EngineError::Validation(report);
    error!(execution_id = %execution_id, error = %err, "routine rejected");
    deps
      .sink
      .emit(ExecutionEvent::ExecutionUpdated {
        execution_id: execution_id.clone(),
        status: ExecutionStatus::Failed,
        completed_at: Some(Utc::now()),
        error: Some(err.to_string()),
        execution_path: None,
      })
      .await;
    return Err(err);
  }

  let graph = Arc::new(ExecutionGraph::build(input));
  let loop_nodes: HashSet<String> = graph
    .nodes()
    .values()
    .filter(|n| {
      deps
        .registry
        .get(&n.plugin_id)
        .is_ok_and(|p| p.descriptor().is_loop())
    })
    .map(|n| n.id.clone())
    .collect();

  let trigger = graph.trigger().clone();
  deps
    .sink
    .emit(ExecutionEvent::ExecutionCreated {
      execution_id: execution_id.clone(),
      routine_id: input.routine_id.clone(),
      user_id: input.user_id.clone(),
      trigger_type: trigger.trigger_type.clone(),
      trigger_data: trigger.data.clone(),
      started_at,
    })
    .await;
  deps
    .sink
    .emit(ExecutionEvent::ExecutionUpdated {
      execution_id: execution_id.clone(),
      status: ExecutionStatus::Running,
      completed_at: None,
      error: None,
      execution_path: None,
    })
    .await;
  info!(execution_id = %execution_id, nodes = graph.nodes().len(), "execution started");

  let mut iterator = GraphIterator::new(graph, loop_nodes);
  let meta = ExecutionMeta {
    execution_id: execution_id.clone(),
    routine_id: input.routine_id.clone(),
    user_id: input.user_id.clone(),
    started_at,
  };
  let runner = TaskRunner::new(
    config.clone(),
    deps.registry.clone(),
    deps.credentials.clone(),
    deps.sink.clone(),
    deps.heartbeat.clone(),
  );

  let result = runner.run(&mut iterator, &meta, &cancel).await;
  let state = iterator.into_state();
  let execution_path = state.execution_path().to_vec();

  let (status, error) = match &result {
    Ok(()) => (ExecutionStatus::Completed, None),
    Err(EngineError::Cancelled) => (ExecutionStatus::Cancelled, None),
    Err(EngineError::DeadlineExceeded) => (ExecutionStatus::Timeout, None),
    Err(e) => (ExecutionStatus::Failed, Some(e.to_string())),
  };
  deps
    .sink
    .emit(ExecutionEvent::ExecutionUpdated {
      execution_id: execution_id.clone(),
      status,
      completed_at: Some(Utc::now()),
      error: error.clone(),
      execution_path: Some(execution_path.clone()),
    })
    .await;

  match result {
    Ok(()) => {
      info!(execution_id = %execution_id, steps = execution_path.len(), "execution completed");
      Ok(ExecutionOutcome {
        execution_id,
        status: ExecutionStatus::Completed,
        execution_path,
        state,
      })
    }
    Err(EngineError::Cancelled) => {
      info!(execution_id = %execution_id, "execution cancelled");
      Ok(ExecutionOutcome {
        execution_id,
        status: ExecutionStatus::Cancelled,
        execution_path,
        state,
      })
    }
    Err(EngineError::DeadlineExceeded) => {
      info!(execution_id = %execution_id, "execution timed out");
      Ok(ExecutionOutcome {
        execution_id,
        status: ExecutionStatus::Timeout,
        execution_path,
        state,
      })
    }
    Err(e) => {
      error!(execution_id = %execution_id, error = %e, "execution failed");
      Err(e)
    }
  }
}
