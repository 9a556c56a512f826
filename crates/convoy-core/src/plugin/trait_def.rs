//! The `ItemPlugin` trait -- the task-generation interface per item type.
//!
//! The trait is object-safe so implementations can be stored as
//! `Box<dyn ItemPlugin>` in the [`super::PluginRegistry`].

use anyhow::Result;
use async_trait::async_trait;

use convoy_db::models::TaskKind;

use crate::manifest::FragmentChange;
use crate::model::ModelDelta;

/// A task emitted by a plugin for the current model delta.
///
/// Specs are plugin output, not yet scheduled work: the graph builder and
/// phase compiler turn them into plan tasks with phase assignments.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Filled in by the registry with the emitting plugin's name.
    pub plugin_id: String,
    pub item_path: String,
    pub node: String,
    /// Unique within the plan; tasks are matched across recreations by it.
    pub description: String,
    pub kind: TaskKind,
    /// When false, success is never recorded in the ledger.
    pub persisted: bool,
    /// Descriptions of tasks that must complete first.
    pub wait_for: Vec<String>,
    /// Handler name for `Callback` tasks, dispatched to the emitting plugin.
    pub callback: Option<String>,
    /// Manifest change for `Config` tasks.
    pub change: Option<FragmentChange>,
}

impl TaskSpec {
    /// A convergence-polled configuration task.
    pub fn config(
        item_path: impl Into<String>,
        node: impl Into<String>,
        description: impl Into<String>,
        change: FragmentChange,
    ) -> Self {
        Self {
            plugin_id: String::new(),
            item_path: item_path.into(),
            node: node.into(),
            description: description.into(),
            kind: TaskKind::Config,
            persisted: true,
            wait_for: Vec::new(),
            callback: None,
            change: Some(change),
        }
    }

    /// A task that runs a plugin handler directly.
    pub fn callback(
        item_path: impl Into<String>,
        node: impl Into<String>,
        description: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: String::new(),
            item_path: item_path.into(),
            node: node.into(),
            description: description.into(),
            kind: TaskKind::Callback,
            persisted: true,
            wait_for: Vec::new(),
            callback: Some(handler.into()),
            change: None,
        }
    }

    /// An artificial ordering link within a chain of tasks.
    pub fn ordered_link(
        item_path: impl Into<String>,
        node: impl Into<String>,
        description: impl Into<String>,
        wait_for: Vec<String>,
    ) -> Self {
        Self {
            plugin_id: String::new(),
            item_path: item_path.into(),
            node: node.into(),
            description: description.into(),
            kind: TaskKind::OrderedListLink,
            persisted: false,
            wait_for,
            callback: None,
            change: None,
        }
    }

    /// Builder-style: mark the task as not ledger-persisted.
    pub fn not_persisted(mut self) -> Self {
        self.persisted = false;
        self
    }

    /// Builder-style: add a dependency by description.
    pub fn after(mut self, description: impl Into<String>) -> Self {
        self.wait_for.push(description.into());
        self
    }
}

/// Task-generation capability implemented per item type.
#[async_trait]
pub trait ItemPlugin: Send + Sync {
    /// Plugin name, used as the registry key and for callback dispatch.
    fn name(&self) -> &str;

    /// Emit tasks for the model delta.
    ///
    /// Implementations must give every task a target node and a description
    /// unique within the plan.
    fn generate_tasks(&self, delta: &ModelDelta) -> Vec<TaskSpec>;

    /// Execute a `Callback` task's handler.
    async fn run_callback(&self, handler: &str, item_path: &str, node: &str) -> Result<()> {
        let _ = (item_path, node);
        anyhow::bail!("plugin {:?} has no callback handler {handler:?}", self.name())
    }
}

const _: () = {
    fn _assert_object_safe(_: &dyn ItemPlugin) {}
};
