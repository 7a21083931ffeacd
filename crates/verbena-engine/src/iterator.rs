//! The branch-aware scheduler.
//!
//! The iterator decides which `(node, context)` pairs are ready, prunes
//! subgraphs behind empty branches, instantiates loop bodies once per
//! iteration, and defers `done` branches until the loop's body subtree has
//! quiesced. Ready tasks are emitted in lexicographic `(node_id,
//! context_key)` order so identical inputs replay identically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};
use verbena_plugin::{NodeOutputs, OutputItem};
use verbena_routine::ExecutionGraph;

use crate::error::EngineError;
use crate::state::{ExecutionState, NodeStatus};
use crate::task::{ExecutionTask, LoopContext, LoopFrame, TaskKey};

/// Output port names that mark a plugin as loop-driving.
const PORT_BODY: &str = "body";
const PORT_DONE: &str = "done";

/// A completed loop whose `done` branch is waiting for the body subtree.
struct DeferredDone {
  node_id: String,
  context: LoopContext,
  body_edges: Vec<String>,
}

enum EdgeStatus {
  /// The source has no terminal result visible yet.
  Unresolved,
  /// The source produced at least one item on the referenced port.
  Fired,
  /// The source was skipped, or completed with an empty port.
  Skipped,
}

/// Dynamic scheduler over one execution of an [`ExecutionGraph`].
pub struct GraphIterator {
  graph: Arc<ExecutionGraph>,
  /// Nodes whose plugin declares the `body`/`done` port pair.
  loop_nodes: HashSet<String>,
  /// Ready tasks not yet handed to the runner, in emission order.
  pending: BTreeMap<TaskKey, LoopContext>,
  /// Tasks handed out and awaiting a terminal outcome.
  outstanding: HashMap<TaskKey, LoopContext>,
  deferred_done: Vec<DeferredDone>,
  state: ExecutionState,
}

impl GraphIterator {
  /// Build the iterator and seed it with the graph's entry nodes under the
  /// root context.
  pub fn new(graph: Arc<ExecutionGraph>, loop_nodes: HashSet<String>) -> Self {
    let mut iterator = Self {
      graph: graph.clone(),
      loop_nodes,
      pending: BTreeMap::new(),
      outstanding: HashMap::new(),
      deferred_done: Vec::new(),
      state: ExecutionState::new(),
    };
    for entry in graph.entry_nodes() {
      iterator.enqueue(entry, LoopContext::root());
    }
    iterator
  }

  /// Drain the currently ready tasks, in deterministic order.
  pub fn next_batch(&mut self) -> Vec<ExecutionTask> {
    let drained = std::mem::take(&mut self.pending);
    let mut batch = Vec::with_capacity(drained.len());
    for (key, context) in drained {
      self.outstanding.insert(key.clone(), context.clone());
      batch.push(ExecutionTask::new(key.node_id, context));
    }
    batch
  }

  /// Record that the runner has started an emitted task.
  pub fn mark_node_started(&mut self, task: &ExecutionTask) {
    self.state.record_running(task.key());
  }

  /// Record a successful completion and compute the new ready set.
  pub fn mark_node_completed(
    &mut self,
    task: &ExecutionTask,
    outputs: NodeOutputs,
  ) -> Result<(), EngineError> {
    let key = task.key();
    if self.outstanding.remove(&key).is_none() {
      warn!(task = %key, "completion for a task the iterator did not hand out");
    }
    let iteration = task.context.innermost().map(|f| f.iteration);
    if self.state.record_completed(key.clone(), iteration, outputs).is_err() {
      return Err(EngineError::Stalled {
        detail: format!("duplicate terminal result for task '{}'", key),
      });
    }
    debug!(task = %key, "node completed");

    if self.loop_nodes.contains(&task.node_id) {
      self.schedule_loop_body(task);
    } else {
      let graph = self.graph.clone();
      for edge in graph.outgoing(&task.node_id) {
        self.evaluate_target(&edge.target_node_id, &task.context);
      }
    }

    self.release_drained_loops();
    Ok(())
  }

  /// Record a failure. No further downstream tasks are emitted for this
  /// context; the runner decides whether the execution continues.
  pub fn mark_node_failed(&mut self, task: &ExecutionTask, kind: &str, message: String) {
    let key = task.key();
    self.outstanding.remove(&key);
    self.state.record_failed(key, kind, message);
  }

  /// Collect the target's input items by following reverse edges under the
  /// task's context. Items from a loop body edge are narrowed to the frame's
  /// iteration.
  pub fn gather_inputs(&self, task: &ExecutionTask) -> NodeOutputs {
    let mut inputs = NodeOutputs::new();
    for edge in self.graph.incoming(&task.node_id) {
      let Some(record) = self.state.find_record(&edge.source_node_id, &task.context) else {
        continue;
      };
      if record.status != NodeStatus::Completed {
        continue;
      }
      let Some(items) = record.outputs.get(&edge.source_port) else {
        continue;
      };

      let selected: Vec<OutputItem> = match task.context.frame_for_edge(&edge.id) {
        Some(frame) => {
          let matched: Vec<OutputItem> = items
            .iter()
            .filter(|item| item.metadata.iteration == Some(frame.iteration))
            .cloned()
            .collect();
          if matched.is_empty() {
            // The loop plugin left iteration metadata off; fall back to
            // positional selection.
            items.get(frame.iteration as usize).cloned().into_iter().collect()
          } else {
            matched
          }
        }
        None => items.clone(),
      };

      inputs
        .entry(edge.target_port.clone())
        .or_default()
        .extend(selected);
    }
    inputs
  }

  /// True when no ready, outstanding, or deferred work remains.
  pub fn is_done(&self) -> bool {
    self.pending.is_empty() && self.outstanding.is_empty() && self.deferred_done.is_empty()
  }

  pub fn has_running_nodes(&self) -> bool {
    !self.outstanding.is_empty()
  }

  /// Ready-but-undrained task count, for stall reporting.
  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }

  pub fn graph(&self) -> &Arc<ExecutionGraph> {
    &self.graph
  }

  pub fn state(&self) -> &ExecutionState {
    &self.state
  }

  pub fn into_state(self) -> ExecutionState {
    self.state
  }

  fn enqueue(&mut self, node_id: &str, context: LoopContext) {
    let key = TaskKey::new(node_id, context.context_key());
    if self.state.record(&key).is_some()
      || self.pending.contains_key(&key)
      || self.outstanding.contains_key(&key)
    {
      return;
    }
    self.pending.insert(key, context);
  }

  /// Re-evaluate readiness of `target_id` under `context` after an upstream
  /// change. Safe to call repeatedly: scheduling is idempotent per key.
  fn evaluate_target(&mut self, target_id: &str, context: &LoopContext) {
    let key = TaskKey::new(target_id, context.context_key());
    if self.state.record(&key).is_some()
      || self.pending.contains_key(&key)
      || self.outstanding.contains_key(&key)
    {
      return;
    }

    let graph = self.graph.clone();
    let mut any_fired = false;
    let mut incoming = 0usize;
    for edge in graph.incoming(target_id) {
      incoming += 1;
      match self.edge_status(edge, context) {
        EdgeStatus::Unresolved => return,
        EdgeStatus::Fired => any_fired = true,
        EdgeStatus::Skipped => {}
      }
    }

    if incoming == 0 || any_fired {
      self.enqueue(target_id, context.clone());
    } else {
      // Every incoming branch is skipped: prune this node and propagate.
      debug!(task = %key, "pruned: all incoming branches skipped");
      self.state.record_skipped(key);
      for edge in graph.outgoing(target_id) {
        self.evaluate_target(&edge.target_node_id, context);
      }
    }
  }

  fn edge_status(&self, edge: &verbena_config::ConnectionDef, context: &LoopContext) -> EdgeStatus {
    let Some(record) = self.state.find_record(&edge.source_node_id, context) else {
      return EdgeStatus::Unresolved;
    };
    match record.status {
      NodeStatus::Running | NodeStatus::Failed => EdgeStatus::Unresolved,
      NodeStatus::Skipped => EdgeStatus::Skipped,
      NodeStatus::Completed => {
        // A loop's `done` branch stays unresolved until its body subtree
        // has quiesced.
        if edge.source_port == PORT_DONE
          && self.deferred_done.iter().any(|d| {
            d.node_id == edge.source_node_id && d.context.context_key() == context.context_key()
          })
        {
          return EdgeStatus::Unresolved;
        }
        if context.frame_for_edge(&edge.id).is_some() {
          // Scheduled for a specific iteration: the item exists by
          // construction.
          return EdgeStatus::Fired;
        }
        match record.outputs.get(&edge.source_port) {
          Some(items) if !items.is_empty() => EdgeStatus::Fired,
          _ => EdgeStatus::Skipped,
        }
      }
    }
  }

  /// Instantiate the body subtree once per emitted item and defer the `done`
  /// branch until the body drains.
  fn schedule_loop_body(&mut self, task: &ExecutionTask) {
    let graph = self.graph.clone();
    let key = task.key();
    let body_items: Vec<OutputItem> = self
      .state
      .record(&key)
      .and_then(|r| r.outputs.get(PORT_BODY))
      .cloned()
      .unwrap_or_default();

    let body_edges: Vec<_> = graph
      .outgoing(&task.node_id)
      .filter(|e| e.source_port == PORT_BODY)
      .cloned()
      .collect();

    // Defer the `done` branch before touching the body subtree so nothing
    // reachable from a pruned body path resolves a `done` edge early.
    self.deferred_done.push(DeferredDone {
      node_id: task.node_id.clone(),
      context: task.context.clone(),
      body_edges: body_edges.iter().map(|e| e.id.clone()).collect(),
    });

    if body_items.is_empty() {
      // Zero iterations: the body branch does not fire and prunes normally.
      for edge in &body_edges {
        self.evaluate_target(&edge.target_node_id, &task.context);
      }
    } else {
      for (position, item) in body_items.iter().enumerate() {
        let iteration = item.metadata.iteration.unwrap_or(position as u64);
        for edge in &body_edges {
          let child = task.context.push(LoopFrame {
            edge_id: edge.id.clone(),
            iteration,
            accumulator: item.metadata.accumulator.clone(),
          });
          self.evaluate_target(&edge.target_node_id, &child);
        }
      }
    }
  }

  /// Release `done` branches of loops whose body subtree has no live tasks.
  fn release_drained_loops(&mut self) {
    loop {
      let Some(position) = self
        .deferred_done
        .iter()
        .position(|d| self.loop_is_drained(d))
      else {
        return;
      };
      let done = self.deferred_done.remove(position);
      debug!(node_id = %done.node_id, "loop body drained, releasing done branch");

      let graph = self.graph.clone();
      for edge in graph.outgoing(&done.node_id) {
        if edge.source_port == PORT_DONE {
          self.evaluate_target(&edge.target_node_id, &done.context);
        }
      }
    }
  }

  fn loop_is_drained(&self, deferred: &DeferredDone) -> bool {
    let blocks = |context: &LoopContext| {
      context.starts_with(&deferred.context)
        && context
          .frames()
          .iter()
          .any(|f| deferred.body_edges.contains(&f.edge_id))
    };
    !self.pending.values().any(blocks) && !self.outstanding.values().any(blocks)
  }
}
