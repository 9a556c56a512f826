//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{TaskKind, TaskRecord, TaskState};

/// Parameters for inserting a task row.
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub plan_id: Uuid,
    pub description: &'a str,
    pub item_path: &'a str,
    pub node: &'a str,
    pub subtree: &'a str,
    pub phase: i64,
    pub kind: TaskKind,
    pub persisted: bool,
}

/// Insert a new task row in `initial` state.
pub async fn insert_task(pool: &SqlitePool, new: &NewTask<'_>) -> Result<TaskRecord> {
    let record = TaskRecord {
        id: Uuid::new_v4(),
        plan_id: new.plan_id,
        description: new.description.to_owned(),
        item_path: new.item_path.to_owned(),
        node: new.node.to_owned(),
        subtree: new.subtree.to_owned(),
        phase: new.phase,
        kind: new.kind,
        persisted: new.persisted,
        state: TaskState::Initial,
    };

    sqlx::query(
        "INSERT INTO tasks (id, plan_id, description, item_path, node, subtree, \
                            phase, kind, persisted, state) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id)
    .bind(record.plan_id)
    .bind(&record.description)
    .bind(&record.item_path)
    .bind(&record.node)
    .bind(&record.subtree)
    .bind(record.phase)
    .bind(record.kind)
    .bind(record.persisted)
    .bind(record.state)
    .execute(pool)
    .await
    .with_context(|| format!("failed to insert task {:?}", new.description))?;

    Ok(record)
}

/// List all tasks for a plan, ordered by subtree, phase, then description.
pub async fn list_tasks_for_plan(pool: &SqlitePool, plan_id: Uuid) -> Result<Vec<TaskRecord>> {
    let tasks = sqlx::query_as::<_, TaskRecord>(
        "SELECT * FROM tasks WHERE plan_id = ? ORDER BY subtree, phase, description",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for plan")?;

    Ok(tasks)
}

/// Update the state of a task identified by its plan and description.
pub async fn update_task_state(
    pool: &SqlitePool,
    plan_id: Uuid,
    description: &str,
    state: TaskState,
) -> Result<()> {
    let result = sqlx::query("UPDATE tasks SET state = ? WHERE plan_id = ? AND description = ?")
        .bind(state)
        .bind(plan_id)
        .bind(description)
        .execute(pool)
        .await
        .context("failed to update task state")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {description:?} not found in plan {plan_id}");
    }

    Ok(())
}

/// Restart recovery: tasks persisted as `running` were interrupted by a
/// service restart. Reset them to `initial` so the next compile re-includes
/// them unmodified.
///
/// Returns the reset tasks.
pub async fn reset_interrupted_tasks(pool: &SqlitePool, plan_id: Uuid) -> Result<Vec<TaskRecord>> {
    let interrupted = sqlx::query_as::<_, TaskRecord>(
        "SELECT * FROM tasks WHERE plan_id = ? AND state = 'running'",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to find interrupted tasks")?;

    sqlx::query("UPDATE tasks SET state = 'initial' WHERE plan_id = ? AND state = 'running'")
        .bind(plan_id)
        .execute(pool)
        .await
        .context("failed to reset interrupted tasks")?;

    Ok(interrupted
        .into_iter()
        .map(|t| TaskRecord {
            state: TaskState::Initial,
            ..t
        })
        .collect())
}
