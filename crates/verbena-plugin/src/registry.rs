use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PluginError;
use crate::plugin::Plugin;

/// Plugin id → implementation.
///
/// Populated at startup and read-only afterwards; the engine holds it behind
/// an `Arc` and never mutates it during execution.
#[derive(Default)]
pub struct PluginRegistry {
  plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a plugin under its descriptor id. Replaces any previous
  /// registration with the same id.
  pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
    let id = plugin.descriptor().id.clone();
    self.plugins.insert(id, plugin);
  }

  /// Look up a plugin by id.
  pub fn get(&self, plugin_id: &str) -> Result<Arc<dyn Plugin>, PluginError> {
    self
      .plugins
      .get(plugin_id)
      .cloned()
      .ok_or_else(|| PluginError::NotFound {
        plugin_id: plugin_id.to_string(),
      })
  }

  pub fn contains(&self, plugin_id: &str) -> bool {
    self.plugins.contains_key(plugin_id)
  }

  /// Registered ids, sorted.
  pub fn plugin_ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
  }
}
