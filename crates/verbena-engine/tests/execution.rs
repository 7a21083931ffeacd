//! End-to-end execution scenarios driven through the durable driver.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use verbena_config::{VariableDef, VariableType};
use verbena_engine::{
  run, ChannelSink, EngineConfig, EngineError, ExecutionEvent, ExecutionStatus, NodeStatus,
  TaskKey,
};

use support::*;

fn path_ids(outcome: &verbena_engine::ExecutionOutcome) -> Vec<String> {
  outcome
    .execution_path
    .iter()
    .map(|p| p.node_id.clone())
    .collect()
}

#[tokio::test]
async fn linear_chain_completes() {
  let input = routine(
    vec![
      node("A", "static-data", json!({ "data": 1 })),
      node("B", "double", json!({})),
      node("C", "add", json!({ "delta": 10 })),
    ],
    vec![
      conn("e1", "A", "out", "B", "in"),
      conn("e2", "B", "out", "C", "in"),
    ],
  );
  let deps = deps(standard_registry());

  let outcome = run(&deps, &EngineConfig::default(), &input, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(outcome.status, ExecutionStatus::Completed);
  assert_eq!(path_ids(&outcome), ["A", "B", "C"]);

  let record = outcome.state.record(&TaskKey::new("C", "")).unwrap();
  assert_eq!(record.outputs["out"][0].data, json!(12));

  // Completed keys and the execution path agree.
  assert_eq!(outcome.state.completed_keys().len(), outcome.execution_path.len());

  // A consumer starts only after its producer completed.
  let b = outcome.state.record(&TaskKey::new("B", "")).unwrap();
  assert!(record.started_at >= b.completed_at.unwrap());
}

#[tokio::test]
async fn conditional_branch_prunes_untaken_side() {
  // 5 is not > 10, so the `true` subtree never runs.
  let input = routine(
    vec![
      node("src", "static-data", json!({ "data": 5 })),
      node("cond", "if-else", json!({ "threshold": 10 })),
      node("taken", "merge", json!({})),
      node("not_taken", "merge", json!({})),
    ],
    vec![
      conn("e1", "src", "out", "cond", "in"),
      conn("e2", "cond", "false", "taken", "in"),
      conn("e3", "cond", "true", "not_taken", "in"),
    ],
  );
  let deps = deps(standard_registry());

  let outcome = run(&deps, &EngineConfig::default(), &input, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(outcome.status, ExecutionStatus::Completed);
  assert_eq!(path_ids(&outcome), ["src", "cond", "taken"]);
  assert_eq!(
    outcome.state.record(&TaskKey::new("not_taken", "")).unwrap().status,
    NodeStatus::Skipped
  );
  let taken = outcome.state.record(&TaskKey::new("taken", "")).unwrap();
  assert_eq!(taken.outputs["out"][0].data, json!(5));
}

#[tokio::test]
async fn parallel_entries_merge_once_under_cap() {
  let gate = GatePlugin::new(2);
  let mut registry = standard_registry();
  registry.register(gate.clone());

  let input = routine(
    vec![
      node("left", "gate", json!({ "data": "l" })),
      node("right", "gate", json!({ "data": "r" })),
      node("merge", "merge", json!({})),
    ],
    vec![
      conn("e1", "left", "out", "merge", "in"),
      conn("e2", "right", "out", "merge", "in"),
    ],
  );
  let deps = deps(registry);
  let config = EngineConfig {
    max_concurrent_activities: 2,
    ..EngineConfig::default()
  };

  let outcome = run(&deps, &config, &input, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(outcome.status, ExecutionStatus::Completed);
  // Both entries were in flight at once (the barrier requires it), and the
  // cap was never exceeded.
  assert_eq!(gate.max_active.load(Ordering::SeqCst), 2);

  // The merge ran exactly once, with both inputs present.
  assert_eq!(path_ids(&outcome).iter().filter(|id| *id == "merge").count(), 1);
  let merge = outcome.state.record(&TaskKey::new("merge", "")).unwrap();
  assert_eq!(merge.outputs["out"].len(), 2);
}

#[tokio::test]
async fn loop_runs_body_per_item_then_done() {
  let input = routine(
    vec![
      node("src", "static-data", json!({ "data": ["a", "b", "c"] })),
      node("split", "split-batches", json!({})),
      node("work", "merge", json!({})),
      node("after", "merge", json!({})),
    ],
    vec![
      conn("e1", "src", "out", "split", "in"),
      conn("eb", "split", "body", "work", "in"),
      conn("ed", "split", "done", "after", "in"),
    ],
  );
  let deps = deps(standard_registry());

  let outcome = run(&deps, &EngineConfig::default(), &input, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(outcome.status, ExecutionStatus::Completed);
  assert_eq!(path_ids(&outcome), ["src", "split", "work", "work", "work", "after"]);

  // One result per iteration, in item order.
  for (iteration, expected) in ["a", "b", "c"].iter().enumerate() {
    let key = TaskKey::new("work", format!("eb:{}", iteration));
    let record = outcome.state.record(&key).unwrap();
    assert_eq!(record.outputs["out"][0].data, json!(expected));
  }

  // The `done` branch ran exactly once, at the root context, with the
  // aggregate collection.
  let after = outcome.state.record(&TaskKey::new("after", "")).unwrap();
  assert_eq!(after.outputs["out"][0].data, json!(["a", "b", "c"]));
  let work_iterations: Vec<_> = outcome
    .execution_path
    .iter()
    .filter(|p| p.node_id == "work")
    .map(|p| p.iteration)
    .collect();
  assert_eq!(work_iterations, [Some(0), Some(1), Some(2)]);
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_recover_with_backoff() {
  let (flaky, calls) = flaky_plugin(2);
  let mut registry = standard_registry();
  registry.register(flaky);

  let input = routine(vec![node("only", "flaky", json!({}))], vec![]);
  let deps = deps(registry);

  let before = tokio::time::Instant::now();
  let outcome = run(&deps, &EngineConfig::default(), &input, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(outcome.status, ExecutionStatus::Completed);
  assert_eq!(calls.load(Ordering::SeqCst), 3);
  // Two backoffs: 1s then 2s.
  assert!(before.elapsed() >= Duration::from_secs(3));

  // A single terminal entry despite the retries.
  assert_eq!(path_ids(&outcome), ["only"]);
  let record = outcome.state.record(&TaskKey::new("only", "")).unwrap();
  assert_eq!(record.outputs["out"][0].data, json!("recovered"));
}

#[tokio::test]
async fn cycle_is_rejected_before_execution() {
  let input = routine(
    vec![
      node("A", "merge", json!({})),
      node("B", "merge", json!({})),
    ],
    vec![
      conn("e1", "A", "out", "B", "in"),
      conn("e2", "B", "out", "A", "in"),
    ],
  );
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let deps = deps_with_sink(standard_registry(), Arc::new(ChannelSink::new(tx)));

  let err = run(&deps, &EngineConfig::default(), &input, CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::Validation(_)));
  assert_eq!(err.kind(), "validation");

  // The store sees one failed update and no node-state entries.
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  assert_eq!(events.len(), 1);
  match &events[0] {
    ExecutionEvent::ExecutionUpdated { status, error, .. } => {
      assert_eq!(*status, ExecutionStatus::Failed);
      assert!(error.as_deref().unwrap_or_default().contains("validation"));
    }
    other => panic!("unexpected event: {:?}", other),
  }
}

#[tokio::test]
async fn fatal_node_failure_propagates() {
  let mut registry = standard_registry();
  registry.register(FnPlugin::new(
    descriptor("broken", &["in"], &["out"]),
    |_i, _c, _x| Err(verbena_plugin::PluginError::Fatal("bad state".to_string())),
  ));

  let input = routine(
    vec![
      node("A", "static-data", json!({ "data": 1 })),
      node("B", "broken", json!({})),
      node("C", "merge", json!({})),
    ],
    vec![
      conn("e1", "A", "out", "B", "in"),
      conn("e2", "B", "out", "C", "in"),
    ],
  );
  let deps = deps(registry);

  let err = run(&deps, &EngineConfig::default(), &input, CancellationToken::new())
    .await
    .unwrap_err();
  match err {
    EngineError::NodeFailed { node_id, .. } => assert_eq!(node_id, "B"),
    other => panic!("unexpected error: {}", other),
  }
}

#[tokio::test]
async fn expressions_flow_into_parameters() {
  let mut input = routine(
    vec![
      node("A", "static-data", json!({ "data": "{{ vars.greeting }}, {{ vars.name }}!" })),
      node("B", "add", json!({ "delta": "{{ vars.delta }}" })),
      node("C", "static-data", json!({ "data": "{{ nodes.B.out[0] }}" })),
    ],
    vec![
      conn("e1", "A", "out", "B", "in"),
      conn("e2", "B", "out", "C", "in"),
    ],
  );
  input.variables = vec![
    VariableDef {
      name: "greeting".to_string(),
      variable_type: VariableType::String,
      value: json!("hello"),
    },
    VariableDef {
      name: "name".to_string(),
      variable_type: VariableType::String,
      value: json!("world"),
    },
    VariableDef {
      name: "delta".to_string(),
      variable_type: VariableType::Number,
      value: json!(7),
    },
  ];
  let deps = deps(standard_registry());

  let outcome = run(&deps, &EngineConfig::default(), &input, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(outcome.status, ExecutionStatus::Completed);

  // Interpolated string in A's config.
  let a = outcome.state.record(&TaskKey::new("A", "")).unwrap();
  assert_eq!(a.outputs["out"][0].data, json!("hello, world!"));

  // Whole-value number in B's config: `delta` stayed numeric. "hello,
  // world!" is not numeric, so add treats it as 0 and emits 7.
  let b = outcome.state.record(&TaskKey::new("B", "")).unwrap();
  assert_eq!(b.outputs["out"][0].data.as_f64(), Some(7.0));

  // Node-output reference resolved under C's context.
  let c = outcome.state.record(&TaskKey::new("C", "")).unwrap();
  assert_eq!(c.outputs["out"][0].data.as_f64(), Some(7.0));
}

#[tokio::test]
async fn deterministic_replay_produces_identical_paths() {
  let build = || {
    routine(
      vec![
        node("src", "static-data", json!({ "data": [3, 20] })),
        node("split", "split-batches", json!({})),
        node("cond", "if-else", json!({ "threshold": 10 })),
        node("big", "merge", json!({})),
        node("small", "merge", json!({})),
        node("after", "merge", json!({})),
      ],
      vec![
        conn("e1", "src", "out", "split", "in"),
        conn("eb", "split", "body", "cond", "in"),
        conn("e2", "cond", "true", "big", "in"),
        conn("e3", "cond", "false", "small", "in"),
        conn("ed", "split", "done", "after", "in"),
      ],
    )
  };

  let first = run(
    &deps(standard_registry()),
    &EngineConfig::default(),
    &build(),
    CancellationToken::new(),
  )
  .await
  .unwrap();
  let second = run(
    &deps(standard_registry()),
    &EngineConfig::default(),
    &build(),
    CancellationToken::new(),
  )
  .await
  .unwrap();

  assert_eq!(first.execution_path, second.execution_path);
  // Iteration 0 (3) takes the `false` branch, iteration 1 (20) takes `true`.
  assert_eq!(
    first.state.record(&TaskKey::new("small", "eb:0")).unwrap().status,
    NodeStatus::Completed
  );
  assert_eq!(
    first.state.record(&TaskKey::new("big", "eb:0")).unwrap().status,
    NodeStatus::Skipped
  );
  assert_eq!(
    first.state.record(&TaskKey::new("big", "eb:1")).unwrap().status,
    NodeStatus::Completed
  );
}

#[tokio::test(start_paused = true)]
async fn cancellation_drains_and_reports_cancelled() {
  let mut registry = standard_registry();
  registry.register(SleepyPlugin::new());

  let input = routine(
    vec![
      node("slow", "sleepy", json!({ "delay_ms": 10000 })),
      node("next", "merge", json!({})),
    ],
    vec![conn("e1", "slow", "out", "next", "in")],
  );
  let deps = deps(registry);

  let cancel = CancellationToken::new();
  cancel.cancel();
  let outcome = run(&deps, &EngineConfig::default(), &input, cancel)
    .await
    .unwrap();

  assert_eq!(outcome.status, ExecutionStatus::Cancelled);
  assert!(outcome
    .execution_path
    .iter()
    .all(|p| p.node_id != "next"));
}

#[tokio::test(start_paused = true)]
async fn execution_deadline_reports_timeout() {
  let mut registry = standard_registry();
  registry.register(SleepyPlugin::new());

  let input = routine(
    vec![
      node("slow", "sleepy", json!({ "delay_ms": 60000 })),
      node("next", "merge", json!({})),
    ],
    vec![conn("e1", "slow", "out", "next", "in")],
  );
  let deps = deps(registry);
  let config = EngineConfig {
    execution_deadline: Some(Duration::from_millis(50)),
    ..EngineConfig::default()
  };

  let outcome = run(&deps, &config, &input, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(outcome.status, ExecutionStatus::Timeout);
}

#[tokio::test(start_paused = true)]
async fn activity_deadline_aborts_the_node() {
  let mut registry = standard_registry();
  registry.register(SleepyPlugin::new());

  let input = routine(
    vec![node("slow", "sleepy", json!({ "delay_ms": 60000 }))],
    vec![],
  );
  let deps = deps(registry);
  let config = EngineConfig {
    activity_timeout: Duration::from_millis(100),
    ..EngineConfig::default()
  };

  let err = run(&deps, &config, &input, CancellationToken::new())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), "aborted");
}

#[tokio::test(start_paused = true)]
async fn abort_while_cancelling_keeps_cancelled_status() {
  // The sleepy plugin ignores its cancellation token, so after the cancel
  // signal it runs on until its activity deadline abandons it. The abort
  // recorded during the drain must not flip the terminal status to failed.
  let mut registry = standard_registry();
  registry.register(SleepyPlugin::new());

  let input = routine(
    vec![node("stubborn", "sleepy", json!({ "delay_ms": 60000 }))],
    vec![],
  );
  let deps = deps(registry);
  let config = EngineConfig {
    activity_timeout: Duration::from_secs(1),
    ..EngineConfig::default()
  };

  let cancel = CancellationToken::new();
  cancel.cancel();
  let outcome = run(&deps, &config, &input, cancel).await.unwrap();

  assert_eq!(outcome.status, ExecutionStatus::Cancelled);
  // The abandoned activity was still recorded as aborted.
  assert_eq!(outcome.state.errors().len(), 1);
  assert_eq!(outcome.state.errors()[0].kind, "aborted");
  assert!(outcome.execution_path.is_empty());
}

#[tokio::test(start_paused = true)]
async fn abort_while_timing_out_keeps_timeout_status() {
  let mut registry = standard_registry();
  registry.register(SleepyPlugin::new());

  let input = routine(
    vec![node("stubborn", "sleepy", json!({ "delay_ms": 60000 }))],
    vec![],
  );
  let deps = deps(registry);
  let config = EngineConfig {
    activity_timeout: Duration::from_secs(1),
    execution_deadline: Some(Duration::from_millis(50)),
    ..EngineConfig::default()
  };

  let outcome = run(&deps, &config, &input, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(outcome.status, ExecutionStatus::Timeout);
  assert_eq!(outcome.state.errors().len(), 1);
  assert_eq!(outcome.state.errors()[0].kind, "aborted");
}
