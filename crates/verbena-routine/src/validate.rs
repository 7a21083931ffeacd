//! Structural validation - run this before persisting or executing a routine.
//!
//! Checks, in order:
//! 1. Node IDs and variable names are unique; variable values match their
//!    declared types.
//! 2. Every connection references existing nodes on both ends.
//! 3. At least one entry node exists (a node with no incoming edges).
//! 4. No node is orphaned (lacking both incoming and outgoing edges) unless
//!    it is the only node in the routine.
//! 5. The directed graph is acyclic (DFS with a recursion stack; the
//!    offending path is reported).
//! 6. Every node is reachable from some entry node (BFS); unreachable nodes
//!    are warnings, as is the presence of multiple entry nodes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use verbena_config::RoutineInput;

/// A validation error. The routine must not be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
  DuplicateNodeId { node_id: String },
  DuplicateVariable { name: String },
  VariableTypeMismatch { name: String },
  MissingEndpoint { connection_id: String, node_id: String },
  NoEntryNodes,
  OrphanedNode { node_id: String },
  CycleDetected { path: Vec<String> },
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::DuplicateNodeId { node_id } => write!(f, "duplicate node id '{}'", node_id),
      Self::DuplicateVariable { name } => write!(f, "duplicate variable '{}'", name),
      Self::VariableTypeMismatch { name } => {
        write!(f, "variable '{}' value does not match its declared type", name)
      }
      Self::MissingEndpoint {
        connection_id,
        node_id,
      } => write!(
        f,
        "connection '{}' references unknown node '{}'",
        connection_id, node_id
      ),
      Self::NoEntryNodes => write!(f, "routine has no entry nodes"),
      Self::OrphanedNode { node_id } => {
        write!(f, "node '{}' has no incoming or outgoing connections", node_id)
      }
      Self::CycleDetected { path } => write!(f, "cycle detected: {}", path.join(" -> ")),
    }
  }
}

/// A validation warning. The routine may still be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
  UnreachableNode { node_id: String },
  MultipleEntryNodes { node_ids: Vec<String> },
}

impl fmt::Display for ValidationWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UnreachableNode { node_id } => {
        write!(f, "node '{}' is not reachable from any entry node", node_id)
      }
      Self::MultipleEntryNodes { node_ids } => {
        write!(f, "routine has multiple entry nodes: {}", node_ids.join(", "))
      }
    }
  }
}

/// Outcome of validating a routine definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
  pub errors: Vec<ValidationError>,
  pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
  pub fn valid(&self) -> bool {
    self.errors.is_empty()
  }
}

impl fmt::Display for ValidationReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
    write!(f, "{}", messages.join("; "))
  }
}

/// Validate a routine definition.
pub fn validate(input: &RoutineInput) -> ValidationReport {
  let mut report = ValidationReport::default();

  // Unique node ids
  let mut seen_ids: HashSet<&str> = HashSet::new();
  for node in &input.nodes {
    if !seen_ids.insert(node.id.as_str()) {
      report.errors.push(ValidationError::DuplicateNodeId {
        node_id: node.id.clone(),
      });
    }
  }

  // Unique, well-typed variables
  let mut seen_vars: HashSet<&str> = HashSet::new();
  for var in &input.variables {
    if !seen_vars.insert(var.name.as_str()) {
      report.errors.push(ValidationError::DuplicateVariable {
        name: var.name.clone(),
      });
    }
    if !var.value_matches_type() {
      report.errors.push(ValidationError::VariableTypeMismatch {
        name: var.name.clone(),
      });
    }
  }

  // Connection endpoints
  let node_set: HashSet<&str> = input.nodes.iter().map(|n| n.id.as_str()).collect();
  for conn in &input.connections {
    for endpoint in [&conn.source_node_id, &conn.target_node_id] {
      if !node_set.contains(endpoint.as_str()) {
        report.errors.push(ValidationError::MissingEndpoint {
          connection_id: conn.id.clone(),
          node_id: endpoint.clone(),
        });
      }
    }
  }
  if !report.errors.is_empty() {
    // Adjacency-based checks below assume ids resolve; stop here.
    return report;
  }

  // Adjacency for the graph checks
  let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
  let mut incoming_count: HashMap<&str, usize> = HashMap::new();
  for node in &input.nodes {
    outgoing.entry(node.id.as_str()).or_default();
    incoming_count.entry(node.id.as_str()).or_insert(0);
  }
  for conn in &input.connections {
    outgoing
      .entry(conn.source_node_id.as_str())
      .or_default()
      .push(conn.target_node_id.as_str());
    *incoming_count.entry(conn.target_node_id.as_str()).or_insert(0) += 1;
  }

  let mut entry_nodes: Vec<&str> = input
    .nodes
    .iter()
    .map(|n| n.id.as_str())
    .filter(|id| incoming_count[id] == 0)
    .collect();
  entry_nodes.sort_unstable();

  if !input.nodes.is_empty() && entry_nodes.is_empty() {
    report.errors.push(ValidationError::NoEntryNodes);
  }

  // Orphans: nodes with neither edges in nor out. A single-node routine is
  // legitimately edge-free.
  if input.nodes.len() > 1 {
    for node in &input.nodes {
      let id = node.id.as_str();
      if incoming_count[id] == 0 && outgoing[id].is_empty() {
        report.errors.push(ValidationError::OrphanedNode {
          node_id: node.id.clone(),
        });
      }
    }
  }

  // Cycle detection: DFS with a recursion stack, reporting the closing path.
  if let Some(path) = find_cycle(&input.nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), &outgoing) {
    report.errors.push(ValidationError::CycleDetected { path });
  }

  // Reachability from entry nodes (BFS)
  let mut reached: HashSet<&str> = HashSet::new();
  let mut queue: VecDeque<&str> = entry_nodes.iter().copied().collect();
  while let Some(id) = queue.pop_front() {
    if !reached.insert(id) {
      continue;
    }
    for &next in &outgoing[id] {
      if !reached.contains(next) {
        queue.push_back(next);
      }
    }
  }
  let mut unreachable: Vec<&str> = input
    .nodes
    .iter()
    .map(|n| n.id.as_str())
    .filter(|id| !reached.contains(id))
    .collect();
  unreachable.sort_unstable();
  for id in unreachable {
    report.warnings.push(ValidationWarning::UnreachableNode {
      node_id: id.to_string(),
    });
  }

  if entry_nodes.len() > 1 {
    report.warnings.push(ValidationWarning::MultipleEntryNodes {
      node_ids: entry_nodes.iter().map(|s| s.to_string()).collect(),
    });
  }

  report
}

fn find_cycle(node_ids: &[&str], outgoing: &HashMap<&str, Vec<&str>>) -> Option<Vec<String>> {
  #[derive(Clone, Copy, PartialEq)]
  enum Mark {
    Unvisited,
    InStack,
    Done,
  }

  let mut marks: HashMap<&str, Mark> = node_ids.iter().map(|&id| (id, Mark::Unvisited)).collect();
  let mut sorted_ids: Vec<&str> = node_ids.to_vec();
  sorted_ids.sort_unstable();

  for &start in &sorted_ids {
    if marks[start] != Mark::Unvisited {
      continue;
    }
    // Iterative DFS; the stack holds (node, next-child-index) so the current
    // recursion path can be reconstructed when a back-edge is found.
    let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
    marks.insert(start, Mark::InStack);

    while let Some(top) = stack.len().checked_sub(1) {
      let (node, child_idx) = stack[top];
      let children = &outgoing[node];
      if child_idx < children.len() {
        stack[top].1 += 1;
        let child = children[child_idx];
        match marks[child] {
          Mark::InStack => {
            // Back-edge: the cycle runs from `child` through the stack tail.
            let mut path: Vec<String> = stack
              .iter()
              .map(|(id, _)| id.to_string())
              .skip_while(|id| id.as_str() != child)
              .collect();
            path.push(child.to_string());
            return Some(path);
          }
          Mark::Unvisited => {
            marks.insert(child, Mark::InStack);
            stack.push((child, 0));
          }
          Mark::Done => {}
        }
      } else {
        marks.insert(node, Mark::Done);
        stack.pop();
      }
    }
  }

  None
}
