//! Verbena Plugin
//!
//! This crate defines the capability surface between the execution engine and
//! plugins. A plugin is a value implementing [`Plugin`]: it declares its
//! schemas through a [`PluginDescriptor`] and executes as a pure function
//! `(inputs, config, context) -> outputs`. No inheritance, composition only.
//!
//! The engine never links plugin implementations directly - it resolves them
//! through a [`PluginRegistry`] and invokes them through the activity port,
//! which validates inputs and outputs against the declared JSON Schemas and
//! threads credentials fetched from a [`CredentialStore`].

pub mod builtin;
mod credentials;
mod descriptor;
mod error;
mod output;
mod plugin;
mod registry;
mod schema;

pub use credentials::{CredentialData, CredentialError, CredentialStore, InMemoryCredentialStore};
pub use descriptor::{CredentialRequest, PluginDescriptor};
pub use error::PluginError;
pub use output::{single_port, ItemMetadata, NodeOutputs, OutputItem};
pub use plugin::{Plugin, PluginContext};
pub use registry::PluginRegistry;
pub use schema::validate_against_schema;
