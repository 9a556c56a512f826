//! Database query functions for the `plans` table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{PlanRecord, PlanState};

/// Insert a new plan row, replacing any existing current plan.
///
/// The engine keeps at most one plan; `create_plan` overwrites. Task rows of
/// the old plan are removed by the cascading foreign key.
pub async fn replace_plan(
    pool: &SqlitePool,
    id: Uuid,
    generation: i64,
    model_generation: i64,
) -> Result<PlanRecord> {
    let record = PlanRecord {
        id,
        generation,
        state: PlanState::Initial,
        model_generation,
        created_at: Utc::now(),
    };

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("DELETE FROM plans")
        .execute(&mut *tx)
        .await
        .context("failed to remove previous plan")?;

    sqlx::query(
        "INSERT INTO plans (id, generation, state, model_generation, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(record.id)
    .bind(record.generation)
    .bind(record.state)
    .bind(record.model_generation)
    .bind(record.created_at)
    .execute(&mut *tx)
    .await
    .context("failed to insert plan")?;

    tx.commit().await.context("failed to commit transaction")?;

    Ok(record)
}

/// Fetch the current plan, if one exists.
pub async fn current_plan(pool: &SqlitePool) -> Result<Option<PlanRecord>> {
    let plan = sqlx::query_as::<_, PlanRecord>("SELECT * FROM plans LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("failed to fetch current plan")?;

    Ok(plan)
}

/// Update the state of a plan.
pub async fn update_plan_state(pool: &SqlitePool, id: Uuid, state: PlanState) -> Result<()> {
    let result = sqlx::query("UPDATE plans SET state = ? WHERE id = ?")
        .bind(state)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update plan state")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("plan {id} not found");
    }

    Ok(())
}

/// Delete the plan (and, via cascade, its tasks). The ledger is untouched.
pub async fn delete_plan(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM plans WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete plan")?;

    Ok(())
}

/// Restart recovery: a plan persisted as `running` or `stopping` was
/// interrupted by a service restart. Surface it as `stopped`.
///
/// Returns the recovered plan, if any.
pub async fn recover_interrupted_plan(pool: &SqlitePool) -> Result<Option<PlanRecord>> {
    let plan = current_plan(pool).await?;
    match plan {
        Some(p) if p.state.is_active() => {
            update_plan_state(pool, p.id, PlanState::Stopped).await?;
            Ok(Some(PlanRecord {
                state: PlanState::Stopped,
                ..p
            }))
        }
        _ => Ok(None),
    }
}
