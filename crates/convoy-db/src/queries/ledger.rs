//! Database query functions for the success `ledger` table.
//!
//! The ledger is keyed by task description; the upsert makes each write
//! atomic per description, which is the only cross-context shared state the
//! scheduler mutates.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::LedgerEntry;

/// Record (or refresh) a successful persisted task.
pub async fn record_success(
    pool: &SqlitePool,
    description: &str,
    item_path: &str,
    node: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ledger (description, item_path, node, recorded_at) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (description) DO UPDATE SET \
             item_path = excluded.item_path, \
             node = excluded.node, \
             recorded_at = excluded.recorded_at",
    )
    .bind(description)
    .bind(item_path)
    .bind(node)
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("failed to record ledger entry {description:?}"))?;

    Ok(())
}

/// Fetch a single entry by description.
pub async fn get_entry(pool: &SqlitePool, description: &str) -> Result<Option<LedgerEntry>> {
    let entry =
        sqlx::query_as::<_, LedgerEntry>("SELECT * FROM ledger WHERE description = ?")
            .bind(description)
            .fetch_optional(pool)
            .await
            .context("failed to fetch ledger entry")?;

    Ok(entry)
}

/// All ledger entries, ordered by description.
pub async fn all_entries(pool: &SqlitePool) -> Result<Vec<LedgerEntry>> {
    let entries =
        sqlx::query_as::<_, LedgerEntry>("SELECT * FROM ledger ORDER BY description")
            .fetch_all(pool)
            .await
            .context("failed to list ledger entries")?;

    Ok(entries)
}

/// Entries recorded for a given model item.
pub async fn entries_for_item(pool: &SqlitePool, item_path: &str) -> Result<Vec<LedgerEntry>> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        "SELECT * FROM ledger WHERE item_path = ? ORDER BY description",
    )
    .bind(item_path)
    .fetch_all(pool)
    .await
    .context("failed to list ledger entries for item")?;

    Ok(entries)
}

/// Remove a single entry. Used when an item's deconfiguration succeeds.
pub async fn remove_entry(pool: &SqlitePool, description: &str) -> Result<()> {
    sqlx::query("DELETE FROM ledger WHERE description = ?")
        .bind(description)
        .execute(pool)
        .await
        .context("failed to remove ledger entry")?;

    Ok(())
}

/// Remove every entry recorded for a model item.
pub async fn remove_entries_for_item(pool: &SqlitePool, item_path: &str) -> Result<()> {
    sqlx::query("DELETE FROM ledger WHERE item_path = ?")
        .bind(item_path)
        .execute(pool)
        .await
        .context("failed to remove ledger entries for item")?;

    Ok(())
}
