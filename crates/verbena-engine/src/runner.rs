//! The task runner: a bounded-concurrency driver over the iterator.
//!
//! The runner is the sole owner of the iterator and its state. It keeps up to
//! `max_concurrent_activities` activities in flight, suspends only while
//! waiting for the next completion, and applies outcomes in completion order
//! - so every state mutation is serialized without locks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use verbena_plugin::{CredentialStore, NodeOutputs, PluginContext, PluginRegistry};

use crate::activity::{execute_activity, ActivityError, ActivityInvocation, Heartbeat};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionSink};
use crate::expr::{resolve_parameters, ExecutionInfo, ExpressionContext};
use crate::iterator::GraphIterator;
use crate::task::ExecutionTask;

/// Identity of the running execution, threaded through events and the
/// expression `execution` root.
#[derive(Debug, Clone)]
pub struct ExecutionMeta {
  pub execution_id: String,
  pub routine_id: String,
  pub user_id: String,
  pub started_at: DateTime<Utc>,
}

struct ActivityOutcome {
  task: ExecutionTask,
  result: Result<NodeOutputs, ActivityError>,
}

/// Drives a [`GraphIterator`] to quiescence under the concurrency cap.
pub struct TaskRunner {
  config: EngineConfig,
  registry: Arc<PluginRegistry>,
  credentials: Arc<dyn CredentialStore>,
  sink: Arc<dyn ExecutionSink>,
  heartbeat: Arc<dyn Heartbeat>,
}

impl TaskRunner {
  pub fn new(
    config: EngineConfig,
    registry: Arc<PluginRegistry>,
    credentials: Arc<dyn CredentialStore>,
    sink: Arc<dyn ExecutionSink>,
    heartbeat: Arc<dyn Heartbeat>,
  ) -> Self {
    Self {
      config,
      registry,
      credentials,
      sink,
      heartbeat,
    }
  }

  /// Run until the iterator is done, a fatal failure surfaces, or the
  /// execution is cancelled or times out.
  #[instrument(name = "task_runner", skip_all, fields(execution_id = %meta.execution_id))]
  pub async fn run(
    &self,
    iterator: &mut GraphIterator,
    meta: &ExecutionMeta,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let cap = self.config.max_concurrent_activities.max(1);
    let has_deadline = self.config.execution_deadline.is_some();
    let deadline_sleep = {
      let deadline = self
        .config
        .execution_deadline
        .map(|d| tokio::time::Instant::now() + d);
      async move {
        match deadline {
          Some(at) => tokio::time::sleep_until(at).await,
          None => std::future::pending::<()>().await,
        }
      }
    };
    tokio::pin!(deadline_sleep);

    let mut in_flight: FuturesUnordered<JoinHandle<ActivityOutcome>> = FuturesUnordered::new();
    let mut buffer: VecDeque<ExecutionTask> = VecDeque::new();
    // First fatal failure; set once, further outcomes drain without scheduling.
    let mut failure: Option<EngineError> = None;
    // Cancellation or deadline; in-flight work drains before we return.
    let mut shutdown: Option<EngineError> = None;

    loop {
      if failure.is_none() && shutdown.is_none() {
        buffer.extend(iterator.next_batch());
        while in_flight.len() < cap {
          let Some(task) = buffer.pop_front() else { break };
          self.start_task(iterator, meta, cancel, &mut in_flight, task).await;
        }
      }

      if in_flight.is_empty() {
        // A cancel/timeout signal outranks failures collected while
        // draining: an abandoned activity must not flip the terminal
        // status from cancelled/timeout to failed.
        if let Some(e) = shutdown.take() {
          return Err(e);
        }
        if let Some(e) = failure.take() {
          return Err(e);
        }
        if buffer.is_empty() && iterator.is_done() {
          return Ok(());
        }
        // Nothing running, nothing startable, iterator not done.
        return Err(EngineError::Stalled {
          detail: format!(
            "{} buffered and {} ready task(s) with no running activities",
            buffer.len(),
            iterator.pending_count()
          ),
        });
      }

      let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled(), if shutdown.is_none() && failure.is_none() => {
          warn!("cancellation requested, draining in-flight activities");
          shutdown = Some(EngineError::Cancelled);
          continue;
        }
        _ = &mut deadline_sleep, if has_deadline && shutdown.is_none() && failure.is_none() => {
          warn!("execution deadline reached, draining in-flight activities");
          shutdown = Some(EngineError::DeadlineExceeded);
          continue;
        }
        joined = in_flight.next() => match joined {
          Some(Ok(outcome)) => outcome,
          Some(Err(join_error)) => {
            return Err(EngineError::Stalled {
              detail: format!("activity task aborted: {}", join_error),
            });
          }
          // Guarded by the is_empty check above.
          None => continue,
        }
      };

      self.apply_outcome(iterator, meta, outcome, &mut failure).await;
    }
  }

  /// Resolve parameters, gather inputs, and dispatch one activity.
  async fn start_task(
    &self,
    iterator: &mut GraphIterator,
    meta: &ExecutionMeta,
    cancel: &CancellationToken,
    in_flight: &mut FuturesUnordered<JoinHandle<ActivityOutcome>>,
    task: ExecutionTask,
  ) {
    let Some(node) = iterator.graph().node(&task.node_id).cloned() else {
      // Unreachable for validated routines.
      error!(node_id = %task.node_id, "task references a node missing from the graph");
      iterator.mark_node_failed(
        &task,
        "plugin_not_found",
        format!("node '{}' missing from graph", task.node_id),
      );
      return;
    };

    let execution_info = ExecutionInfo {
      id: meta.execution_id.clone(),
      routine_id: meta.routine_id.clone(),
      started_at: meta.started_at,
    };
    let parameters = {
      let ctx = ExpressionContext {
        state: iterator.state(),
        context: &task.context,
        variables: iterator.graph().variables(),
        trigger: iterator.graph().trigger(),
        execution: &execution_info,
      };
      resolve_parameters(&node.parameters, &ctx)
    };
    let inputs = iterator.gather_inputs(&task);

    iterator.mark_node_started(&task);
    let iteration = task.context.innermost().map(|f| f.iteration);
    self
      .sink
      .emit(ExecutionEvent::NodeStarted {
        execution_id: meta.execution_id.clone(),
        node_id: task.node_id.clone(),
        iteration,
        started_at: Utc::now(),
      })
      .await;
    info!(task = %task.key(), plugin_id = %node.plugin_id, "node started");

    let frame = task.context.innermost();
    let context = PluginContext {
      user_id: meta.user_id.clone(),
      routine_id: meta.routine_id.clone(),
      execution_id: meta.execution_id.clone(),
      node_id: task.node_id.clone(),
      credentials: HashMap::new(),
      trigger: iterator.graph().trigger().clone(),
      loop_iteration: frame.map(|f| f.iteration),
      loop_accumulator: frame.and_then(|f| f.accumulator.clone()),
      cancel: cancel.child_token(),
    };
    let invocation = ActivityInvocation {
      plugin_id: node.plugin_id.clone(),
      parameters,
      inputs,
      credential_mappings: node.credentials.clone(),
      context,
    };

    let registry = self.registry.clone();
    let credentials = self.credentials.clone();
    let heartbeat = self.heartbeat.clone();
    let retry = self.config.retry.clone();
    let timeout = self.config.activity_timeout;

    in_flight.push(tokio::spawn(async move {
      let result = execute_activity(
        &registry,
        credentials.as_ref(),
        heartbeat.as_ref(),
        &retry,
        timeout,
        invocation,
      )
      .await;
      ActivityOutcome { task, result }
    }));
  }

  /// Feed one activity outcome back into the iterator and the sink.
  async fn apply_outcome(
    &self,
    iterator: &mut GraphIterator,
    meta: &ExecutionMeta,
    outcome: ActivityOutcome,
    failure: &mut Option<EngineError>,
  ) {
    let task = outcome.task;
    let iteration = task.context.innermost().map(|f| f.iteration);

    match outcome.result {
      Ok(outputs) => {
        let output_value = serde_json::to_value(&outputs).unwrap_or(serde_json::Value::Null);
        match iterator.mark_node_completed(&task, outputs) {
          Ok(()) => {
            info!(task = %task.key(), "node completed");
            self
              .sink
              .emit(ExecutionEvent::NodeCompleted {
                execution_id: meta.execution_id.clone(),
                node_id: task.node_id.clone(),
                iteration,
                output: output_value,
                completed_at: Utc::now(),
              })
              .await;
          }
          Err(e) => {
            error!(task = %task.key(), error = %e, "scheduler rejected completion");
            failure.get_or_insert(e);
          }
        }
      }
      Err(e) => {
        let message = e.to_string();
        error!(task = %task.key(), error = %message, "node failed");
        iterator.mark_node_failed(&task, e.kind(), message.clone());
        self
          .sink
          .emit(ExecutionEvent::NodeFailed {
            execution_id: meta.execution_id.clone(),
            node_id: task.node_id.clone(),
            iteration,
            error: message,
            completed_at: Utc::now(),
          })
          .await;
        failure.get_or_insert(EngineError::NodeFailed {
          node_id: task.node_id.clone(),
          source: e,
        });
      }
    }
  }
}
