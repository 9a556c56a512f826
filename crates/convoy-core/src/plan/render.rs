//! Textual rendering of a plan for `show`.
//!
//! The format is part of the transport contract: callers parse the phase
//! numbering and match tasks through the literal `DESC` field, so the
//! layout must stay stable.

use std::collections::BTreeMap;

use convoy_db::models::{PlanState, TaskRecord, TaskState};

fn task_state_label(state: TaskState) -> &'static str {
    match state {
        TaskState::Initial => "Initial",
        TaskState::Running => "Running",
        TaskState::Success => "Success",
        TaskState::Failed => "Failed",
    }
}

fn plan_state_label(state: PlanState) -> &'static str {
    match state {
        PlanState::Initial => "Initial",
        PlanState::Running => "Running",
        PlanState::Stopping => "Stopping",
        PlanState::Stopped => "Stopped",
        PlanState::Failed => "Failed",
        PlanState::Successful => "Successful",
        PlanState::Invalid => "Invalid",
    }
}

/// Render the persisted plan snapshot.
///
/// Tasks are grouped by phase index across subtrees; within a phase they
/// are listed in description order so repeated renders are byte-identical.
pub fn render_plan(state: PlanState, tasks: &[TaskRecord]) -> String {
    let mut phases: BTreeMap<i64, Vec<&TaskRecord>> = BTreeMap::new();
    for task in tasks {
        phases.entry(task.phase).or_default().push(task);
    }

    let mut out = String::new();
    for (index, mut phase_tasks) in phases {
        phase_tasks.sort_by(|a, b| a.description.cmp(&b.description));
        out.push_str(&format!("Phase {index}\n"));
        for task in phase_tasks {
            out.push_str(&format!(
                "    Task: {}    {}\n",
                task_state_label(task.state),
                task.node
            ));
            out.push_str(&format!("        DESC: {}\n", task.description));
        }
    }
    out.push_str(&format!("Plan Status: {}\n", plan_state_label(state)));
    out
}
