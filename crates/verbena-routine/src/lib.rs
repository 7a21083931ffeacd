//! Verbena Routine
//!
//! This crate provides the validated graph representation for verbena.
//! An [`ExecutionGraph`] is the locked form of a routine definition that the
//! engine executes: node map, forward and reverse adjacency, frozen
//! variables, and the trigger payload.
//!
//! Key differences from `verbena-config`:
//! - Graph structure is validated (endpoints exist, no orphans, no cycles)
//! - Entry nodes are identified
//! - Variables are frozen into a name → value map
//! - Ready to be driven by the engine's scheduler

mod error;
mod graph;
mod validate;

pub use error::RoutineError;
pub use graph::ExecutionGraph;
pub use validate::{validate, ValidationError, ValidationReport, ValidationWarning};
