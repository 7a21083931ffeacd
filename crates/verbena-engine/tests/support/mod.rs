//! Shared test plugins and routine builders.
//!
//! Plugin implementations live here, outside the engine: the engine only
//! ever sees them through the registry.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use verbena_config::{ConnectionDef, NodeDef, RoutineInput, TriggerPayload};
use verbena_engine::{EngineDeps, ExecutionSink, NoopHeartbeat, NoopSink};
use verbena_plugin::{
  single_port, InMemoryCredentialStore, NodeOutputs, OutputItem, Plugin, PluginContext,
  PluginDescriptor, PluginError, PluginRegistry,
};

type SyncExec =
  dyn Fn(&NodeOutputs, &Value, &PluginContext) -> Result<NodeOutputs, PluginError> + Send + Sync;

/// A plugin backed by a synchronous closure.
pub struct FnPlugin {
  descriptor: PluginDescriptor,
  exec: Box<SyncExec>,
}

impl FnPlugin {
  pub fn new(
    descriptor: PluginDescriptor,
    exec: impl Fn(&NodeOutputs, &Value, &PluginContext) -> Result<NodeOutputs, PluginError>
      + Send
      + Sync
      + 'static,
  ) -> Arc<Self> {
    Arc::new(Self {
      descriptor,
      exec: Box::new(exec),
    })
  }
}

#[async_trait]
impl Plugin for FnPlugin {
  fn descriptor(&self) -> &PluginDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    inputs: &NodeOutputs,
    config: &Value,
    context: &PluginContext,
  ) -> Result<NodeOutputs, PluginError> {
    (self.exec)(inputs, config, context)
  }
}

/// A plugin that sleeps for `delay_ms` from its config before echoing.
pub struct SleepyPlugin {
  descriptor: PluginDescriptor,
}

impl SleepyPlugin {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      descriptor: descriptor("sleepy", &["in"], &["out"]),
    })
  }
}

#[async_trait]
impl Plugin for SleepyPlugin {
  fn descriptor(&self) -> &PluginDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    inputs: &NodeOutputs,
    config: &Value,
    _context: &PluginContext,
  ) -> Result<NodeOutputs, PluginError> {
    let delay = config.get("delay_ms").and_then(Value::as_u64).unwrap_or(1000);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    Ok(single_port(
      "out",
      inputs.get("in").cloned().unwrap_or_default(),
    ))
  }
}

/// A plugin that waits at a shared barrier and tracks peak concurrency.
pub struct GatePlugin {
  descriptor: PluginDescriptor,
  barrier: Arc<tokio::sync::Barrier>,
  active: AtomicUsize,
  pub max_active: AtomicUsize,
}

impl GatePlugin {
  pub fn new(parties: usize) -> Arc<Self> {
    Arc::new(Self {
      descriptor: descriptor("gate", &["in"], &["out"]),
      barrier: Arc::new(tokio::sync::Barrier::new(parties)),
      active: AtomicUsize::new(0),
      max_active: AtomicUsize::new(0),
    })
  }
}

#[async_trait]
impl Plugin for GatePlugin {
  fn descriptor(&self) -> &PluginDescriptor {
    &self.descriptor
  }

  async fn execute(
    &self,
    _inputs: &NodeOutputs,
    config: &Value,
    _context: &PluginContext,
  ) -> Result<NodeOutputs, PluginError> {
    let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_active.fetch_max(now_active, Ordering::SeqCst);
    self.barrier.wait().await;
    self.active.fetch_sub(1, Ordering::SeqCst);
    Ok(single_port(
      "out",
      vec![OutputItem::new(config.get("data").cloned().unwrap_or(Value::Null))],
    ))
  }
}

/// Build a descriptor whose input/output schemas declare the given ports.
pub fn descriptor(id: &str, input_ports: &[&str], output_ports: &[&str]) -> PluginDescriptor {
  fn ports_schema(ports: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = ports
      .iter()
      .map(|p| (p.to_string(), json!({ "type": "array" })))
      .collect();
    json!({ "type": "object", "properties": properties })
  }

  PluginDescriptor {
    id: id.to_string(),
    name: id.to_string(),
    version: "1.0.0".to_string(),
    input_schema: ports_schema(input_ports),
    output_schema: ports_schema(output_ports),
    config_schema: json!({ "type": "object" }),
    credential_requests: vec![],
  }
}

fn double_value(value: &Value) -> Value {
  match value.as_i64() {
    Some(n) => json!(n * 2),
    None => json!(value.as_f64().unwrap_or(0.0) * 2.0),
  }
}

fn add_value(value: &Value, delta: &Value) -> Value {
  match (value.as_i64(), delta.as_i64()) {
    (Some(a), Some(b)) => json!(a + b),
    _ => json!(value.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0)),
  }
}

/// The stock registry: the built-in structural plugins plus two small
/// arithmetic plugins the scenarios use.
pub fn standard_registry() -> PluginRegistry {
  let mut registry = PluginRegistry::new();
  verbena_plugin::builtin::register_all(&mut registry);

  // Doubles each numeric input item.
  registry.register(FnPlugin::new(
    descriptor("double", &["in"], &["out"]),
    |inputs, _config, _ctx| {
      let items = inputs
        .get("in")
        .map(|items| {
          items
            .iter()
            .map(|i| OutputItem::new(double_value(&i.data)))
            .collect()
        })
        .unwrap_or_default();
      Ok(single_port("out", items))
    },
  ));

  // Adds its configured `delta` to each numeric input item.
  registry.register(FnPlugin::new(
    descriptor("add", &["in"], &["out"]),
    |inputs, config, _ctx| {
      let delta = config.get("delta").cloned().unwrap_or(json!(0));
      let items = inputs
        .get("in")
        .map(|items| {
          items
            .iter()
            .map(|i| OutputItem::new(add_value(&i.data, &delta)))
            .collect()
        })
        .unwrap_or_default();
      Ok(single_port("out", items))
    },
  ));

  registry
}

/// A plugin that fails with retryable errors for the first `failures` calls.
pub fn flaky_plugin(failures: u32) -> (Arc<FnPlugin>, Arc<AtomicU32>) {
  let calls = Arc::new(AtomicU32::new(0));
  let counter = calls.clone();
  let plugin = FnPlugin::new(descriptor("flaky", &["in"], &["out"]), move |_i, _c, _x| {
    if counter.fetch_add(1, Ordering::SeqCst) < failures {
      Err(PluginError::Retryable("upstream hiccup".to_string()))
    } else {
      Ok(single_port("out", vec![OutputItem::new(json!("recovered"))]))
    }
  });
  (plugin, calls)
}

pub fn node(id: &str, plugin_id: &str, parameters: Value) -> NodeDef {
  NodeDef {
    id: id.to_string(),
    plugin_id: plugin_id.to_string(),
    label: String::new(),
    parameters,
    credentials: Default::default(),
  }
}

pub fn conn(id: &str, from: &str, from_port: &str, to: &str, to_port: &str) -> ConnectionDef {
  ConnectionDef {
    id: id.to_string(),
    source_node_id: from.to_string(),
    source_port: from_port.to_string(),
    target_node_id: to.to_string(),
    target_port: to_port.to_string(),
    connection_type: "main".to_string(),
  }
}

pub fn routine(nodes: Vec<NodeDef>, connections: Vec<ConnectionDef>) -> RoutineInput {
  RoutineInput {
    routine_id: "r1".to_string(),
    user_id: "u1".to_string(),
    nodes,
    connections,
    variables: vec![],
    trigger: Some(TriggerPayload {
      trigger_type: "manual".to_string(),
      data: json!({}),
    }),
  }
}

pub fn deps(registry: PluginRegistry) -> EngineDeps {
  deps_with_sink(registry, Arc::new(NoopSink))
}

pub fn deps_with_sink(registry: PluginRegistry, sink: Arc<dyn ExecutionSink>) -> EngineDeps {
  EngineDeps {
    registry: Arc::new(registry),
    credentials: Arc::new(InMemoryCredentialStore::new()),
    sink,
    heartbeat: Arc::new(NoopHeartbeat),
  }
}
