//! # Change Journal Repository
//!
//! Pending local changes waiting to be pushed.
//!
//! ## Journal Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Change Journal Lifecycle                             │
//! │                                                                         │
//! │  LOCAL WRITE (StoreTransaction, origin = Local)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  1. INSERT/UPDATE/DELETE records                                │   │
//! │  │  2. INSERT INTO sync_changes (type, table, pk, obj, mods, ...)  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  pending(limit) ─► PushRequest.clientChanges                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Push succeeded ─► acknowledge(ids)  (rows deleted)                    │
//! │  Push failed    ─► untouched, retried next cycle                       │
//! │                                                                         │
//! │  SYNC WRITES (origin = Sync) never reach this table.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use strata_core::{ChangeType, LocalChange, TableName};

#[derive(Debug, sqlx::FromRow)]
struct ChangeRow {
    id: i64,
    change_type: i64,
    table_name: String,
    pk: String,
    obj: Option<String>,
    mods: Option<String>,
    old_obj: Option<String>,
    created_at: DateTime<Utc>,
}

impl ChangeRow {
    fn into_change(self) -> DbResult<LocalChange> {
        let corrupt = |reason: String| DbError::corrupt(self.table_name.clone(), self.pk.clone(), reason);

        let change_type = u8::try_from(self.change_type)
            .map_err(|e| e.to_string())
            .and_then(|v| ChangeType::try_from(v).map_err(|e| e.to_string()))
            .map_err(corrupt)?;

        let parse = |text: &Option<String>| -> DbResult<Option<Value>> {
            text.as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .map_err(|e| corrupt(e.to_string()))
        };
        let obj = parse(&self.obj)?;
        let mods = parse(&self.mods)?;
        let old_obj = parse(&self.old_obj)?;

        Ok(LocalChange {
            id: self.id,
            change_type,
            table: TableName::new(self.table_name),
            key: self.pk,
            obj,
            mods,
            old_obj,
            created_at: self.created_at,
        })
    }
}

// =============================================================================
// Shared Statements
// =============================================================================

/// Appends one journal entry. Returns its id.
pub(crate) async fn insert_change<'e, E>(
    executor: E,
    change_type: ChangeType,
    table: &str,
    key: &str,
    obj: Option<&Value>,
    mods: Option<&Value>,
    old_obj: Option<&Value>,
) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let obj = obj.map(serde_json::to_string).transpose()?;
    let mods = mods.map(serde_json::to_string).transpose()?;
    let old_obj = old_obj.map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO sync_changes (change_type, table_name, pk, obj, mods, old_obj, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(u8::from(change_type))
    .bind(table)
    .bind(key)
    .bind(obj)
    .bind(mods)
    .bind(old_obj)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    debug!(table = %table, key = %key, kind = change_type.as_str(), "Change captured");

    Ok(result.last_insert_rowid())
}

/// Deletes journal entries by id. Returns how many existed.
pub(crate) async fn delete_changes(conn: &mut SqliteConnection, ids: &[i64]) -> DbResult<u64> {
    let mut removed = 0;
    for id in ids {
        removed += sqlx::query("DELETE FROM sync_changes WHERE id = ?1")
            .bind(*id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(removed)
}

pub(crate) async fn delete_changes_for(
    conn: &mut SqliteConnection,
    table: &str,
    key: &str,
    up_to_id: i64,
) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM sync_changes
        WHERE table_name = ?1 AND pk = ?2 AND id <= ?3
        "#,
    )
    .bind(table)
    .bind(key)
    .bind(up_to_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the pending change journal.
#[derive(Debug, Clone)]
pub struct ChangeRepository {
    pool: SqlitePool,
}

impl ChangeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ChangeRepository { pool }
    }

    /// Gets pending changes, oldest first.
    pub async fn pending(&self, limit: u32) -> DbResult<Vec<LocalChange>> {
        let rows = sqlx::query_as::<_, ChangeRow>(
            r#"
            SELECT id, change_type, table_name, pk, obj, mods, old_obj, created_at
            FROM sync_changes
            ORDER BY id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChangeRow::into_change).collect()
    }

    /// Counts pending changes.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_changes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
