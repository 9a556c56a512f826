//! Phase scheduler: executes a running plan's phases concurrently across
//! independent subtrees.
//!
//! One execution context per subtree advances that subtree's phases
//! strictly in order; contexts progress concurrently. A context with a
//! declared dependency on another subtree does not start until the
//! dependee has completed every phase successfully. `stop_plan` is
//! advisory at the phase boundary: no new phase starts, running tasks
//! reach a terminal state. A failed task never crashes the scheduler --
//! only true dependents are blocked.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use convoy_db::models::{PlanState, TaskKind, TaskState};
use convoy_db::queries::ledger as ledger_db;
use convoy_db::queries::plans as plan_db;
use convoy_db::queries::tasks as task_db;

use crate::convergence::{self, ConvergeConfig};
use crate::manifest::ManifestApplier;
use crate::model::ModelStore;
use crate::plan::{Plan, Phase, Subtree, Task};
use crate::plugin::PluginRegistry;

/// Shared collaborators for one scheduler run.
pub struct SchedulerContext {
    pub pool: SqlitePool,
    pub model: Arc<Mutex<ModelStore>>,
    pub registry: Arc<PluginRegistry>,
    pub applier: Arc<dyn ManifestApplier>,
    pub converge: ConvergeConfig,
}

/// Terminal result of running a plan's phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerResult {
    /// Every task reached `Success`.
    Successful,
    /// Stopped before completion; unfinished tasks remain `Initial`.
    Stopped,
    /// At least one task failed and no further progress was possible.
    Failed { failed_tasks: Vec<String> },
}

impl SchedulerResult {
    /// The plan state this result settles into.
    pub fn plan_state(&self) -> PlanState {
        match self {
            Self::Successful => PlanState::Successful,
            Self::Stopped => PlanState::Stopped,
            Self::Failed { .. } => PlanState::Failed,
        }
    }
}

/// How a subtree's execution context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubtreeOutcome {
    /// All phases completed successfully.
    Success,
    /// A task in this subtree failed; later phases were not started.
    Failed,
    /// Stopped at a phase boundary before completing.
    Stopped,
    /// A dependee subtree did not complete; nothing here ran.
    Blocked,
}

/// Execute every phase of a `Running` plan.
///
/// Returns the terminal result; the caller persists the resulting plan
/// state. Task states are written through to the snapshot store as they
/// change.
pub async fn run_plan_phases(
    ctx: &Arc<SchedulerContext>,
    plan: &Plan,
    cancel: CancellationToken,
) -> Result<SchedulerResult> {
    // One watch channel per subtree announces its terminal outcome to
    // dependents.
    let mut senders: HashMap<String, watch::Sender<Option<SubtreeOutcome>>> = HashMap::new();
    let mut receivers: HashMap<String, watch::Receiver<Option<SubtreeOutcome>>> = HashMap::new();
    for subtree in &plan.subtrees {
        let (tx, rx) = watch::channel(None);
        senders.insert(subtree.id.clone(), tx);
        receivers.insert(subtree.id.clone(), rx);
    }

    let mut workers = JoinSet::new();
    for subtree in plan.subtrees.clone() {
        let ctx = Arc::clone(ctx);
        let cancel = cancel.clone();
        let done_tx = senders
            .remove(&subtree.id)
            .expect("every subtree has a sender");
        let dep_rxs: Vec<(String, watch::Receiver<Option<SubtreeOutcome>>)> = subtree
            .depends_on
            .iter()
            .filter_map(|dep| receivers.get(dep).map(|rx| (dep.clone(), rx.clone())))
            .collect();
        let plan_id = plan.id;

        workers.spawn(async move {
            let outcome = run_subtree(&ctx, plan_id, &subtree, dep_rxs, &cancel).await;
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(
                        subtree = %subtree.id,
                        error = %error,
                        "subtree execution context failed"
                    );
                    SubtreeOutcome::Failed
                }
            };
            let _ = done_tx.send(Some(outcome));
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(error) = joined {
            tracing::error!(error = %error, "subtree worker panicked");
        }
    }

    // Terminal result from the persisted task states.
    let tasks = task_db::list_tasks_for_plan(&ctx.pool, plan.id).await?;
    let failed_tasks: Vec<String> = tasks
        .iter()
        .filter(|t| t.state == TaskState::Failed)
        .map(|t| t.description.clone())
        .collect();

    if !failed_tasks.is_empty() {
        Ok(SchedulerResult::Failed { failed_tasks })
    } else if tasks.iter().all(|t| t.state == TaskState::Success) {
        Ok(SchedulerResult::Successful)
    } else {
        Ok(SchedulerResult::Stopped)
    }
}

/// Whether a stop has been requested, either in-process or by another
/// controller process writing `Stopping` to the snapshot store.
async fn stop_requested(
    pool: &SqlitePool,
    plan_id: Uuid,
    cancel: &CancellationToken,
) -> Result<bool> {
    if cancel.is_cancelled() {
        return Ok(true);
    }
    let record = plan_db::current_plan(pool).await?;
    Ok(matches!(
        record,
        Some(r) if r.id == plan_id && r.state == PlanState::Stopping
    ))
}

async fn run_subtree(
    ctx: &Arc<SchedulerContext>,
    plan_id: Uuid,
    subtree: &Subtree,
    dep_rxs: Vec<(String, watch::Receiver<Option<SubtreeOutcome>>)>,
    cancel: &CancellationToken,
) -> Result<SubtreeOutcome> {
    // Block until every dependee subtree has fully completed.
    for (dep_id, mut rx) in dep_rxs {
        let outcome = loop {
            if let Some(outcome) = *rx.borrow() {
                break outcome;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Dependee worker died without reporting.
                        break SubtreeOutcome::Failed;
                    }
                }
                () = cancel.cancelled() => {
                    return Ok(SubtreeOutcome::Stopped);
                }
            }
        };
        if outcome != SubtreeOutcome::Success {
            tracing::warn!(
                subtree = %subtree.id,
                dependee = %dep_id,
                outcome = ?outcome,
                "dependee subtree did not complete; blocking dependent"
            );
            return Ok(SubtreeOutcome::Blocked);
        }
    }

    for phase in &subtree.phases {
        // Advisory cancellation: checked before starting a phase, never
        // mid-phase, so a stop landing during the final phase lets it run
        // to completion.
        if stop_requested(&ctx.pool, plan_id, cancel).await? {
            tracing::info!(
                subtree = %subtree.id,
                phase = phase.index,
                "stop requested; not starting further phases"
            );
            return Ok(SubtreeOutcome::Stopped);
        }

        if !run_phase(ctx, plan_id, subtree, phase).await? {
            return Ok(SubtreeOutcome::Failed);
        }
    }

    Ok(SubtreeOutcome::Success)
}

/// Run every task of one phase concurrently. Returns `true` when all tasks
/// succeeded.
async fn run_phase(
    ctx: &Arc<SchedulerContext>,
    plan_id: Uuid,
    subtree: &Subtree,
    phase: &Phase,
) -> Result<bool> {
    tracing::info!(
        subtree = %subtree.id,
        phase = phase.index,
        tasks = phase.tasks.len(),
        "starting phase"
    );

    let deadline = ctx.converge.phase_deadline();
    let mut running = JoinSet::new();
    for task in phase.tasks.clone() {
        let ctx = Arc::clone(ctx);
        running.spawn(async move {
            let state = match deadline {
                Some(budget) => {
                    match tokio::time::timeout(budget, execute_task(&ctx, plan_id, &task)).await {
                        Ok(result) => result,
                        Err(_elapsed) => fail_timed_out_task(&ctx, plan_id, &task).await,
                    }
                }
                None => execute_task(&ctx, plan_id, &task).await,
            };
            (task.description, state)
        });
    }

    let mut all_success = true;
    while let Some(joined) = running.join_next().await {
        match joined {
            Ok((_, Ok(TaskState::Success))) => {}
            Ok((description, Ok(state))) => {
                tracing::warn!(task = %description, state = %state, "task did not succeed");
                all_success = false;
            }
            Ok((description, Err(error))) => {
                tracing::error!(task = %description, error = %error, "task execution error");
                all_success = false;
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "task panicked");
                all_success = false;
            }
        }
    }

    Ok(all_success)
}

/// Run one task to a terminal state, writing state changes through to the
/// snapshot store and, on success, the ledger and model lifecycle.
async fn execute_task(
    ctx: &Arc<SchedulerContext>,
    plan_id: Uuid,
    task: &Task,
) -> Result<TaskState> {
    task_db::update_task_state(&ctx.pool, plan_id, &task.description, TaskState::Running)
        .await
        .context("failed to mark task running")?;
    tracing::info!(task = %task.description, node = %task.node, "task running");

    match task.kind {
        TaskKind::OrderedListLink => finish_success(ctx, plan_id, task).await,
        TaskKind::Callback => {
            let plugin_id = task.plugin_id.as_deref().unwrap_or_default();
            let handler = task.callback.as_deref().unwrap_or_default();
            let result = ctx
                .registry
                .run_callback(plugin_id, handler, &task.item_path, &task.node)
                .await;
            match result {
                Ok(()) => finish_success(ctx, plan_id, task).await,
                Err(error) => {
                    tracing::warn!(
                        task = %task.description,
                        error = %error,
                        "callback task failed"
                    );
                    finish_failure(ctx, plan_id, task, false).await
                }
            }
        }
        TaskKind::Config => {
            let Some(change) = task.change.clone() else {
                tracing::error!(task = %task.description, "config task without a fragment change");
                return finish_failure(ctx, plan_id, task, false).await;
            };
            let result = convergence::run_config_task(
                ctx.applier.as_ref(),
                &ctx.converge,
                &task.node,
                change,
            )
            .await;
            match result {
                Ok(()) => finish_success(ctx, plan_id, task).await,
                Err(error) => {
                    tracing::warn!(
                        task = %task.description,
                        node = %task.node,
                        error = %error,
                        "config task failed to converge"
                    );
                    let indeterminable = error.outcome_indeterminable();
                    finish_failure(ctx, plan_id, task, indeterminable).await
                }
            }
        }
    }
}

async fn finish_success(
    ctx: &Arc<SchedulerContext>,
    plan_id: Uuid,
    task: &Task,
) -> Result<TaskState> {
    task_db::update_task_state(&ctx.pool, plan_id, &task.description, TaskState::Success)
        .await
        .context("failed to mark task successful")?;

    if task.persisted {
        ledger_db::record_success(&ctx.pool, &task.description, &task.item_path, &task.node)
            .await
            .context("failed to record ledger entry")?;
    }

    // Ordered-list links are artificial edges; they do not drive the
    // owning item's lifecycle.
    if task.kind != TaskKind::OrderedListLink {
        let mut model = ctx.model.lock().await;
        if task.is_removal() {
            model.finalize_removal(&task.item_path);
            ledger_db::remove_entries_for_item(&ctx.pool, &task.item_path)
                .await
                .context("failed to clear ledger entries for removed item")?;
        } else {
            model.set_applied(&task.item_path);
        }
    }

    tracing::info!(task = %task.description, "task successful");
    Ok(TaskState::Success)
}

async fn finish_failure(
    ctx: &Arc<SchedulerContext>,
    plan_id: Uuid,
    task: &Task,
    indeterminable: bool,
) -> Result<TaskState> {
    // Roll the rendered configuration back to the last converged state.
    if let Some(change) = &task.change {
        if let Err(error) = ctx.applier.revert(&task.node, change.fragment_id()).await {
            tracing::error!(
                task = %task.description,
                node = %task.node,
                error = %error,
                "failed to revert manifest fragment"
            );
        }
    }

    if indeterminable {
        let mut model = ctx.model.lock().await;
        model.mark_indeterminable(&task.item_path);
    }

    task_db::update_task_state(&ctx.pool, plan_id, &task.description, TaskState::Failed)
        .await
        .context("failed to mark task failed")?;

    Ok(TaskState::Failed)
}

/// A task that outran the phase budget: fail it and roll back its fragment.
async fn fail_timed_out_task(
    ctx: &Arc<SchedulerContext>,
    plan_id: Uuid,
    task: &Task,
) -> Result<TaskState> {
    tracing::warn!(
        task = %task.description,
        timeout = ctx.converge.puppet_phase_timeout,
        "phase timeout exceeded; failing task"
    );
    let indeterminable = task.kind == TaskKind::Config;
    finish_failure(ctx, plan_id, task, indeterminable).await
}
