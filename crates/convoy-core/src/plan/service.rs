//! Plan persistence service.
//!
//! Writes a compiled plan into the snapshot store (plan row plus task rows)
//! and reads it back with current execution states. The snapshot is what
//! `show` renders and what restart recovery works from.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use convoy_db::models::{PlanRecord, TaskRecord};
use convoy_db::queries::plans as plan_db;
use convoy_db::queries::tasks::{self as task_db, NewTask};

use super::Plan;

/// Persist a compiled plan, replacing any previous snapshot.
pub async fn persist_plan(pool: &SqlitePool, plan: &Plan) -> Result<PlanRecord> {
    let record = plan_db::replace_plan(pool, plan.id, plan.generation, plan.model_generation)
        .await
        .context("failed to persist plan")?;

    for task in plan.tasks() {
        task_db::insert_task(
            pool,
            &NewTask {
                plan_id: record.id,
                description: &task.description,
                item_path: &task.item_path,
                node: &task.node,
                subtree: &task.subtree,
                phase: task.phase,
                kind: task.kind,
                persisted: task.persisted,
            },
        )
        .await
        .with_context(|| format!("failed to persist task {:?}", task.description))?;
    }

    Ok(record)
}

/// Load the persisted snapshot: plan row plus its tasks.
pub async fn load_snapshot(pool: &SqlitePool) -> Result<Option<(PlanRecord, Vec<TaskRecord>)>> {
    let Some(record) = plan_db::current_plan(pool).await? else {
        return Ok(None);
    };
    let tasks = task_db::list_tasks_for_plan(pool, record.id).await?;
    Ok(Some((record, tasks)))
}
