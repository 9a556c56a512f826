//! Dependency graph builder: turns compiled task lists and their declared
//! dependencies into an adjacency structure, and rejects cycles.
//!
//! Building the graph is a pure transform; no plan state is touched. A
//! cycle fails the whole compile step with [`ApiError::CircularDependency`]
//! naming the units involved -- no partial graph is produced.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ApiError;
use crate::plan::Task;

/// Task dependency adjacency: `deps[i]` holds the indices of tasks that
/// task `i` depends on.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    deps: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Indices of the tasks that `task` depends on.
    pub fn dependencies_of(&self, task: usize) -> &[usize] {
        &self.deps[task]
    }
}

/// Build and validate the task dependency graph.
///
/// Edges come from each task's `wait_for` descriptions. A description must
/// be unique per item (synthesized removals repeat the same literal for
/// sibling items on one node) and every referenced dependency must exist.
/// A `wait_for` description shared by several tasks depends on all of them.
pub fn build_task_graph(tasks: &[Task]) -> Result<DependencyGraph, ApiError> {
    let mut seen: std::collections::HashSet<(&str, &str)> =
        std::collections::HashSet::with_capacity(tasks.len());
    let mut by_description: HashMap<&str, Vec<usize>> = HashMap::with_capacity(tasks.len());
    for (idx, task) in tasks.iter().enumerate() {
        if !seen.insert((task.item_path.as_str(), task.description.as_str())) {
            return Err(ApiError::invalid_request(format!(
                "Create plan failed: duplicate task description {:?}",
                task.description
            )));
        }
        by_description
            .entry(&task.description)
            .or_default()
            .push(idx);
    }

    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (idx, task) in tasks.iter().enumerate() {
        for dep_description in &task.wait_for {
            let dep_indices = by_description.get(dep_description.as_str()).ok_or_else(|| {
                ApiError::invalid_request(format!(
                    "Create plan failed: task {:?} depends on unknown task {:?}",
                    task.description, dep_description
                ))
            })?;
            for &dep_idx in dep_indices {
                if dep_idx != idx && !deps[idx].contains(&dep_idx) {
                    deps[idx].push(dep_idx);
                }
            }
        }
    }

    let descriptions: Vec<&str> = tasks.iter().map(|t| t.description.as_str()).collect();
    check_acyclic(&descriptions, &deps)?;

    Ok(DependencyGraph { deps })
}

/// Validate that a subtree-level dependency map is acyclic.
///
/// `deps` maps each subtree to the subtrees it depends on. Used for cluster
/// `dependency_list` declarations and implied cross-subtree task edges.
pub fn check_subtree_cycles(deps: &BTreeMap<String, Vec<String>>) -> Result<(), ApiError> {
    let mut names: Vec<&str> = deps.keys().map(String::as_str).collect();
    for dependees in deps.values() {
        names.extend(dependees.iter().map(String::as_str));
    }
    names.sort_unstable();
    names.dedup();

    let index_of: HashMap<&str, usize> =
        names.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
    for (subtree, dependees) in deps {
        let idx = index_of[subtree.as_str()];
        for dependee in dependees {
            let dep_idx = index_of[dependee.as_str()];
            if dep_idx != idx && !adjacency[idx].contains(&dep_idx) {
                adjacency[idx].push(dep_idx);
            }
        }
    }

    check_acyclic(&names, &adjacency)
}

/// Topological feasibility check over an adjacency list; on a cycle,
/// reports the names of the strongly connected component's members.
fn check_acyclic(names: &[&str], deps: &[Vec<usize>]) -> Result<(), ApiError> {
    let mut graph = DiGraph::<usize, ()>::with_capacity(names.len(), 0);
    let nodes: Vec<NodeIndex> = (0..names.len()).map(|i| graph.add_node(i)).collect();
    for (idx, dep_list) in deps.iter().enumerate() {
        for &dep in dep_list {
            // Edge from dependee to depender: execution order.
            graph.add_edge(nodes[dep], nodes[idx], ());
        }
    }

    if toposort(&graph, None).is_err() {
        let cycle = tarjan_scc(&graph)
            .into_iter()
            .find(|component| component.len() > 1)
            .unwrap_or_default();
        let mut members: Vec<&str> = cycle.iter().map(|n| names[graph[*n]]).collect();
        members.sort_unstable();
        return Err(ApiError::CircularDependency(members.join(" <-> ")));
    }

    Ok(())
}
