use std::collections::HashMap;

use verbena_config::{ConnectionDef, NodeDef, RoutineInput, TriggerPayload};

/// The locked routine graph, built once per execution.
///
/// Holds the node map, the edge list, and adjacency in both directions so the
/// scheduler can answer "who feeds this node" and "who does this node feed"
/// without scanning. Adjacency maps hold indices into `edges`.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
  nodes: HashMap<String, NodeDef>,
  edges: Vec<ConnectionDef>,
  edges_by_target: HashMap<String, Vec<usize>>,
  edges_by_source: HashMap<String, Vec<usize>>,
  entry_nodes: Vec<String>,
  variables: HashMap<String, serde_json::Value>,
  trigger: TriggerPayload,
}

impl ExecutionGraph {
  /// Build the graph from a routine definition.
  ///
  /// Total on deserialized input: structural defects are reported by
  /// [`crate::validate`], not here. Edges referencing unknown nodes are
  /// still indexed; validation rejects such routines before execution.
  pub fn build(input: &RoutineInput) -> Self {
    let nodes: HashMap<String, NodeDef> = input
      .nodes
      .iter()
      .map(|n| (n.id.clone(), n.clone()))
      .collect();

    let edges: Vec<ConnectionDef> = input.connections.clone();

    let mut edges_by_target: HashMap<String, Vec<usize>> = HashMap::new();
    let mut edges_by_source: HashMap<String, Vec<usize>> = HashMap::new();

    for node_id in nodes.keys() {
      edges_by_target.entry(node_id.clone()).or_default();
      edges_by_source.entry(node_id.clone()).or_default();
    }

    for (idx, edge) in edges.iter().enumerate() {
      edges_by_source
        .entry(edge.source_node_id.clone())
        .or_default()
        .push(idx);
      edges_by_target
        .entry(edge.target_node_id.clone())
        .or_default()
        .push(idx);
    }

    let mut entry_nodes: Vec<String> = nodes
      .keys()
      .filter(|id| {
        edges_by_target
          .get(*id)
          .is_none_or(|incoming| incoming.is_empty())
      })
      .cloned()
      .collect();
    entry_nodes.sort();

    let variables: HashMap<String, serde_json::Value> = input
      .variables
      .iter()
      .map(|v| (v.name.clone(), v.value.clone()))
      .collect();

    Self {
      nodes,
      edges,
      edges_by_target,
      edges_by_source,
      entry_nodes,
      variables,
      trigger: input.trigger.clone().unwrap_or_default(),
    }
  }

  /// Get a node by ID.
  pub fn node(&self, node_id: &str) -> Option<&NodeDef> {
    self.nodes.get(node_id)
  }

  /// All nodes, keyed by ID.
  pub fn nodes(&self) -> &HashMap<String, NodeDef> {
    &self.nodes
  }

  /// All edges in definition order.
  pub fn edges(&self) -> &[ConnectionDef] {
    &self.edges
  }

  /// Edges flowing into the given node.
  pub fn incoming(&self, node_id: &str) -> impl Iterator<Item = &ConnectionDef> {
    self
      .edges_by_target
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
      .iter()
      .map(|&idx| &self.edges[idx])
  }

  /// Edges flowing out of the given node.
  pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &ConnectionDef> {
    self
      .edges_by_source
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
      .iter()
      .map(|&idx| &self.edges[idx])
  }

  /// Nodes with no incoming edges, in lexicographic order.
  pub fn entry_nodes(&self) -> &[String] {
    &self.entry_nodes
  }

  /// Frozen routine variables.
  pub fn variables(&self) -> &HashMap<String, serde_json::Value> {
    &self.variables
  }

  /// The trigger payload this execution was started with.
  pub fn trigger(&self) -> &TriggerPayload {
    &self.trigger
  }
}
