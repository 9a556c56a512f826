//! Plugin registry -- a named collection of item-type plugins.

use std::collections::HashMap;

use anyhow::Result;

use crate::model::ModelDelta;

use super::trait_def::{ItemPlugin, TaskSpec};

/// A collection of registered [`ItemPlugin`] implementations, keyed by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Box<dyn ItemPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under the name returned by [`ItemPlugin::name`].
    ///
    /// If a plugin with the same name is already registered, it is replaced
    /// and the old one is returned.
    pub fn register(&mut self, plugin: impl ItemPlugin + 'static) -> Option<Box<dyn ItemPlugin>> {
        let name = plugin.name().to_string();
        self.plugins.insert(name, Box::new(plugin))
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Option<&dyn ItemPlugin> {
        self.plugins.get(name).map(|b| b.as_ref())
    }

    /// List the names of all registered plugins, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Collect task specs from every plugin for the given delta, stamping
    /// each spec with its emitting plugin's name.
    ///
    /// Plugins are visited in name order so output is deterministic.
    pub fn generate_tasks(&self, delta: &ModelDelta) -> Vec<TaskSpec> {
        let mut specs = Vec::new();
        for name in self.list() {
            let plugin = &self.plugins[name];
            for mut spec in plugin.generate_tasks(delta) {
                spec.plugin_id = name.to_owned();
                specs.push(spec);
            }
        }
        specs
    }

    /// Dispatch a `Callback` task to its emitting plugin.
    pub async fn run_callback(
        &self,
        plugin_id: &str,
        handler: &str,
        item_path: &str,
        node: &str,
    ) -> Result<()> {
        let plugin = self
            .get(plugin_id)
            .ok_or_else(|| anyhow::anyhow!("no plugin registered under {plugin_id:?}"))?;
        plugin.run_callback(handler, item_path, node).await
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.list())
            .finish()
    }
}
