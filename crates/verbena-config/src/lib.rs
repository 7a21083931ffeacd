//! Verbena Config
//!
//! This crate contains the serializable routine definition types for verbena.
//! These types represent routines as they arrive from the outside world - the
//! visual editor, the durable runtime, or a JSON file on disk - before they
//! are validated and locked into an execution graph.
//!
//! Definitions can be loaded from:
//! - JSON files (via the CLI with `verbena run routine.json`)
//! - The durable runtime (as the workflow argument)
//!
//! The engine takes these definition types, validates them structurally, and
//! builds the runtime graph for execution. Everything here must round-trip
//! through JSON: no non-serializable values, no cycles.

mod connection;
mod node;
mod routine;
mod variable;

pub use connection::ConnectionDef;
pub use node::NodeDef;
pub use routine::{RoutineInput, TriggerPayload};
pub use variable::{VariableDef, VariableType};
