//! Item-type plugins: the task-generation capability interface.
//!
//! Each item type contributes tasks for the model delta through
//! [`ItemPlugin::generate_tasks`]; the registry collects them for the
//! dependency graph builder. Callback tasks are dispatched back to their
//! emitting plugin at execution time.

mod registry;
mod resource;
mod trait_def;

pub use registry::PluginRegistry;
pub use resource::ResourcePlugin;
pub use trait_def::{ItemPlugin, TaskSpec};
