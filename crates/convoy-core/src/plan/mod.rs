//! Plan types, the phase compiler, persistence, and `show` rendering.

pub mod compiler;
pub mod render;
pub mod service;

use uuid::Uuid;

use convoy_db::models::{PlanState, TaskKind, TaskState};

use crate::manifest::FragmentChange;

/// A unit of configuration work within a plan.
///
/// Identity across plan recreations is the description string; the task id
/// is only stable within one compiled plan.
#[derive(Debug, Clone)]
pub struct Task {
    pub item_path: String,
    pub node: String,
    /// Execution subtree (cluster path or the management-server root).
    pub subtree: String,
    /// Unique within the plan.
    pub description: String,
    pub kind: TaskKind,
    /// When false, success is never recorded in the ledger.
    pub persisted: bool,
    /// Phase index within the subtree, assigned by the compiler (>= 1).
    pub phase: i64,
    pub state: TaskState,
    /// Emitting plugin, for callback dispatch.
    pub plugin_id: Option<String>,
    /// Handler name for `Callback` tasks.
    pub callback: Option<String>,
    /// Manifest change for `Config` tasks.
    pub change: Option<FragmentChange>,
    /// Descriptions of tasks that must complete first.
    pub wait_for: Vec<String>,
}

impl Task {
    /// True for a synthesized or explicit deconfiguration task.
    pub fn is_removal(&self) -> bool {
        matches!(self.change, Some(FragmentChange::Remove(_)))
    }

    #[cfg(test)]
    pub(crate) fn for_test(description: &str, wait_for: &[&str]) -> Self {
        Self {
            item_path: format!("/ms/items/{description}"),
            node: "ms".to_owned(),
            subtree: "/ms".to_owned(),
            description: description.to_owned(),
            kind: TaskKind::Config,
            persisted: true,
            phase: 0,
            state: TaskState::Initial,
            plugin_id: None,
            callback: None,
            change: None,
            wait_for: wait_for.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// A rank in execution order within one subtree: every task in a phase has
/// its same-subtree dependencies satisfied by strictly earlier phases.
#[derive(Debug, Clone)]
pub struct Phase {
    pub index: i64,
    pub tasks: Vec<Task>,
}

/// An independently-scheduled execution context: one cluster (or the
/// management-server root) and its ordered phase sequence.
#[derive(Debug, Clone)]
pub struct Subtree {
    pub id: String,
    /// Subtrees that must fully complete before this one starts.
    pub depends_on: Vec<String>,
    pub phases: Vec<Phase>,
}

/// A compiled plan: ordered phases grouped by subtree, plus the model
/// generation it was built from.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: Uuid,
    /// Plan-generation counter; stale in-flight operations from an earlier
    /// generation are discarded.
    pub generation: i64,
    /// The model generation this plan was compiled from.
    pub model_generation: i64,
    pub state: PlanState,
    pub subtrees: Vec<Subtree>,
}

impl Plan {
    /// All tasks across subtrees and phases.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.subtrees
            .iter()
            .flat_map(|s| s.phases.iter())
            .flat_map(|p| p.tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.tasks().count()
    }

    /// Highest phase index across all subtrees.
    pub fn final_phase(&self) -> i64 {
        self.tasks().map(|t| t.phase).max().unwrap_or(0)
    }

    /// Find a task by description.
    pub fn find_task(&self, description: &str) -> Option<&Task> {
        self.tasks().find(|t| t.description == description)
    }
}
