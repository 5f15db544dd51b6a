//! # Record Repository
//!
//! Read access to synchronized rows. Writes go through
//! [`crate::store::StoreTransaction`] so change capture can't be bypassed.
//!
//! ## Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  records (table_name, rv DESC) index                                    │
//! │                                                                         │
//! │  Lookup_HoleStatus  00..07D3  ← latest_version()                        │
//! │  Lookup_HoleStatus  00..07D2                                            │
//! │  Lookup_HoleStatus  00..07D1                                            │
//! │  Lookup_HoleStatus  (empty)   ← local-only rows sort last               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde_json::Value;
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::error::{DbError, DbResult};
use strata_core::{Row, VersionToken};

/// Raw `records` row as stored.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecordRow {
    table_name: String,
    pk: String,
    rv: Vec<u8>,
    data: String,
}

impl RecordRow {
    pub(crate) fn into_row(self) -> DbResult<Row> {
        let version = VersionToken::from_bytes(&self.rv)
            .map_err(|e| DbError::corrupt(self.table_name.clone(), self.pk.clone(), e))?;
        let data: Value = serde_json::from_str(&self.data)
            .map_err(|e| DbError::corrupt(self.table_name.clone(), self.pk.clone(), e))?;

        Ok(Row::new(self.table_name, self.pk, version, data))
    }
}

// =============================================================================
// Shared Statements
// =============================================================================
// Used by both the pool-backed repository and open store transactions.

pub(crate) async fn fetch_row<'e, E>(executor: E, table: &str, key: &str) -> DbResult<Option<Row>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let raw = sqlx::query_as::<_, RecordRow>(
        r#"
        SELECT table_name, pk, rv, data
        FROM records
        WHERE table_name = ?1 AND pk = ?2
        "#,
    )
    .bind(table)
    .bind(key)
    .fetch_optional(executor)
    .await?;

    raw.map(RecordRow::into_row).transpose()
}

pub(crate) async fn fetch_version<'e, E>(
    executor: E,
    table: &str,
    key: &str,
) -> DbResult<Option<VersionToken>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rv: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT rv FROM records WHERE table_name = ?1 AND pk = ?2")
            .bind(table)
            .bind(key)
            .fetch_optional(executor)
            .await?;

    rv.map(|bytes| VersionToken::from_bytes(&bytes).map_err(|e| DbError::corrupt(table, key, e)))
        .transpose()
}

pub(crate) async fn upsert_row<'e, E>(executor: E, row: &Row) -> DbResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let data = serde_json::to_string(&row.data)?;

    sqlx::query(
        r#"
        INSERT INTO records (table_name, pk, rv, data, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (table_name, pk) DO UPDATE SET
            rv = excluded.rv,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(row.table.as_str())
    .bind(&row.key)
    .bind(row.version.as_bytes())
    .bind(data)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(())
}

pub(crate) async fn delete_row<'e, E>(executor: E, table: &str, key: &str) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM records WHERE table_name = ?1 AND pk = ?2")
        .bind(table)
        .bind(key)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for row reads.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
}

impl RecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RecordRepository { pool }
    }

    /// Gets one row by `(table, key)`.
    pub async fn get(&self, table: &str, key: &str) -> DbResult<Option<Row>> {
        fetch_row(&self.pool, table, key).await
    }

    /// Lists every row of a table, ordered by key.
    pub async fn list(&self, table: &str) -> DbResult<Vec<Row>> {
        let raw = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT table_name, pk, rv, data
            FROM records
            WHERE table_name = ?1
            ORDER BY pk ASC
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        raw.into_iter().map(RecordRow::into_row).collect()
    }

    /// Returns the highest version token stored for a table.
    ///
    /// An empty table yields [`VersionToken::EMPTY`].
    pub async fn latest_version(&self, table: &str) -> DbResult<VersionToken> {
        let rv: Option<Vec<u8>> = sqlx::query_scalar(
            r#"
            SELECT rv FROM records
            WHERE table_name = ?1
            ORDER BY rv DESC
            LIMIT 1
            "#,
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;

        match rv {
            Some(bytes) => VersionToken::from_bytes(&bytes)
                .map_err(|e| DbError::corrupt(table, "<latest>", e)),
            None => Ok(VersionToken::EMPTY),
        }
    }

    /// Counts rows in a table.
    pub async fn count(&self, table: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE table_name = ?1")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
