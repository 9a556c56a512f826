//! Phase compiler: turns plugin task specs plus the model delta into an
//! ordered, dependency-respecting plan.
//!
//! Responsibilities beyond topological ranking:
//! - synthesize removal tasks for deleted items that left no explicit
//!   deconfiguration task but have ledger-resident configuration;
//! - suppress tasks already recorded successful for still-`Applied` items;
//! - fail with `DoNothingPlanError` when nothing remains to do.

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use convoy_db::models::{LedgerEntry, PlanState, TaskState};

use crate::error::ApiError;
use crate::graph;
use crate::manifest::FragmentChange;
use crate::model::{ItemState, ModelStore};
use crate::plugin::TaskSpec;

use super::{Phase, Plan, Subtree, Task};

/// Description of a synthesized removal task for an item's resource.
pub fn removal_description(node: &str) -> String {
    format!("Remove Item's resource from node \"{node}\" puppet")
}

/// Compile a plan from the current model, the plugin-emitted task specs,
/// and the success ledger.
///
/// Pure with respect to plan state: on any error no plan exists and nothing
/// has been mutated.
pub fn compile(
    model: &ModelStore,
    specs: Vec<TaskSpec>,
    ledger: &[LedgerEntry],
) -> Result<Plan, ApiError> {
    let mut specs = specs;
    synthesize_removals(model, ledger, &mut specs);
    suppress_recorded(model, ledger, &mut specs);

    if specs.is_empty() {
        return Err(ApiError::DoNothingPlan);
    }

    let mut tasks = to_tasks(model, specs)?;
    add_requires_edges(model, &mut tasks);

    let dep_graph = graph::build_task_graph(&tasks)?;

    let subtree_deps = subtree_dependencies(model, &tasks, &dep_graph);
    graph::check_subtree_cycles(&subtree_deps)?;

    assign_phases(&mut tasks, &dep_graph);

    Ok(assemble(tasks, subtree_deps, model.generation()))
}

/// Synthesize a `Remove Item's resource …` task for every `ForRemoval` item
/// that has no plugin-emitted deconfiguration task but does have
/// ledger-resident configuration from an earlier plan.
fn synthesize_removals(model: &ModelStore, ledger: &[LedgerEntry], specs: &mut Vec<TaskSpec>) {
    let items_with_specs: HashSet<String> =
        specs.iter().map(|s| s.item_path.clone()).collect();

    for item in model.items() {
        if item.state != ItemState::ForRemoval {
            continue;
        }
        if items_with_specs.contains(item.path.as_str()) {
            continue;
        }
        // Sorted so the choice of node is deterministic when several tasks
        // were recorded for the item.
        let mut recorded: Vec<&LedgerEntry> = ledger
            .iter()
            .filter(|e| e.item_path == item.path)
            .collect();
        recorded.sort_by(|a, b| a.description.cmp(&b.description));

        let Some(entry) = recorded.first() else {
            continue;
        };

        specs.push(TaskSpec::config(
            &item.path,
            &entry.node,
            removal_description(&entry.node),
            FragmentChange::Remove(item.path.clone()),
        ));
    }
}

/// Drop specs whose description is already recorded successful while the
/// owning item is still `Applied`. Failed or never-run tasks have no ledger
/// entry and are therefore always re-included.
fn suppress_recorded(model: &ModelStore, ledger: &[LedgerEntry], specs: &mut Vec<TaskSpec>) {
    let recorded: HashSet<&str> = ledger.iter().map(|e| e.description.as_str()).collect();
    specs.retain(|spec| {
        let applied = model
            .get(&spec.item_path)
            .is_some_and(|item| item.state == ItemState::Applied);
        !(applied && recorded.contains(spec.description.as_str()))
    });
}

fn to_tasks(model: &ModelStore, specs: Vec<TaskSpec>) -> Result<Vec<Task>, ApiError> {
    let mut tasks = Vec::with_capacity(specs.len());
    for spec in specs {
        if spec.description.trim().is_empty() {
            return Err(ApiError::invalid_request(
                "Create plan failed: task with empty description".to_owned(),
            ));
        }
        if spec.node.trim().is_empty() {
            return Err(ApiError::invalid_request(format!(
                "Create plan failed: task {:?} has no target node",
                spec.description
            )));
        }
        let subtree = model
            .get(&spec.item_path)
            .map(|item| item.subtree())
            .unwrap_or_else(|| crate::model::subtree_of_path(&spec.item_path));
        tasks.push(Task {
            item_path: spec.item_path,
            node: spec.node,
            subtree,
            description: spec.description,
            kind: spec.kind,
            persisted: spec.persisted,
            phase: 0,
            state: TaskState::Initial,
            plugin_id: if spec.plugin_id.is_empty() {
                None
            } else {
                Some(spec.plugin_id)
            },
            callback: spec.callback,
            change: spec.change,
            wait_for: spec.wait_for,
        });
    }
    // Deterministic input order for phase grouping and recompiles.
    tasks.sort_by(|a, b| a.description.cmp(&b.description));
    Ok(tasks)
}

/// Translate `requires` relations between items into task dependencies.
///
/// Deployment order: the task of a dependent item waits for the tasks of
/// the item it requires. Removal order is reversed: the removal of the
/// required item waits for the removal of its dependents.
fn add_requires_edges(model: &ModelStore, tasks: &mut [Task]) {
    let mut deploy_by_item: HashMap<String, Vec<String>> = HashMap::new();
    let mut removal_by_item: HashMap<String, Vec<String>> = HashMap::new();
    for task in tasks.iter() {
        let bucket = if task.is_removal() {
            &mut removal_by_item
        } else {
            &mut deploy_by_item
        };
        bucket
            .entry(task.item_path.clone())
            .or_default()
            .push(task.description.clone());
    }

    let mut extra: Vec<(usize, String)> = Vec::new();
    for (idx, task) in tasks.iter().enumerate() {
        let Some(item) = model.get(&task.item_path) else {
            continue;
        };
        let Some(required) = item.requires() else {
            continue;
        };
        if task.is_removal() {
            // This is the dependent's removal; nothing to wait for here.
            // The reversed edge is added from the required item's side.
            continue;
        }
        if let Some(deps) = deploy_by_item.get(required) {
            for dep in deps {
                extra.push((idx, dep.clone()));
            }
        }
    }

    // Reverse-creation ordering for removals: for every item X requiring Y,
    // Y's removal waits for X's removal.
    for item in model.items() {
        let Some(required) = item.requires() else {
            continue;
        };
        let Some(dependent_removals) = removal_by_item.get(&item.path) else {
            continue;
        };
        for (idx, task) in tasks.iter().enumerate() {
            if task.is_removal() && task.item_path == required {
                for dep in dependent_removals {
                    extra.push((idx, dep.clone()));
                }
            }
        }
    }

    for (idx, dep) in extra {
        if !tasks[idx].wait_for.contains(&dep) {
            tasks[idx].wait_for.push(dep);
        }
    }
}

/// Subtree ordering: cluster `dependency_list` declarations plus edges
/// implied by cross-subtree task dependencies.
fn subtree_dependencies(
    model: &ModelStore,
    tasks: &[Task],
    dep_graph: &graph::DependencyGraph,
) -> BTreeMap<String, Vec<String>> {
    let mut deps = model.cluster_dependencies();

    for (idx, task) in tasks.iter().enumerate() {
        for &dep_idx in dep_graph.dependencies_of(idx) {
            let dependee = &tasks[dep_idx];
            if dependee.subtree != task.subtree {
                let entry = deps.entry(task.subtree.clone()).or_default();
                if !entry.contains(&dependee.subtree) {
                    entry.push(dependee.subtree.clone());
                }
            }
        }
    }

    for dependees in deps.values_mut() {
        dependees.sort_unstable();
        dependees.dedup();
    }
    deps
}

/// Longest-path rank over same-subtree edges: a task's phase is one past
/// the highest phase among its same-subtree dependencies. Cross-subtree
/// dependencies are enforced at subtree granularity by the scheduler, so
/// they do not inflate phase indices.
fn assign_phases(tasks: &mut [Task], dep_graph: &graph::DependencyGraph) {
    // Kahn's ordering over the full (acyclic) dependency graph.
    let n = tasks.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for idx in 0..n {
        for &dep in dep_graph.dependencies_of(idx) {
            indegree[idx] += 1;
            dependents[dep].push(idx);
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(idx) = ready.pop() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    for idx in order {
        let mut phase = 1;
        for &dep in dep_graph.dependencies_of(idx) {
            if tasks[dep].subtree == tasks[idx].subtree {
                phase = phase.max(tasks[dep].phase + 1);
            }
        }
        tasks[idx].phase = phase;
    }
}

fn assemble(
    tasks: Vec<Task>,
    subtree_deps: BTreeMap<String, Vec<String>>,
    model_generation: i64,
) -> Plan {
    let mut grouped: BTreeMap<String, BTreeMap<i64, Vec<Task>>> = BTreeMap::new();
    for task in tasks {
        grouped
            .entry(task.subtree.clone())
            .or_default()
            .entry(task.phase)
            .or_default()
            .push(task);
    }

    let present: HashSet<String> = grouped.keys().cloned().collect();
    let subtrees = grouped
        .into_iter()
        .map(|(id, phases)| {
            // Dependencies on subtrees with no tasks this plan are already
            // satisfied.
            let depends_on = subtree_deps
                .get(&id)
                .map(|deps| {
                    deps.iter()
                        .filter(|d| present.contains(*d))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let phases = phases
                .into_iter()
                .map(|(index, mut tasks)| {
                    tasks.sort_by(|a, b| a.description.cmp(&b.description));
                    Phase { index, tasks }
                })
                .collect();
            Subtree {
                id,
                depends_on,
                phases,
            }
        })
        .collect();

    Plan {
        id: Uuid::new_v4(),
        generation: 0,
        model_generation,
        state: PlanState::Initial,
        subtrees,
    }
}
