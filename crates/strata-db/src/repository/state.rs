//! # Sync State Repository
//!
//! Key/value bookkeeping that survives restarts: the last acknowledged
//! global revision, the device's scoping context and sync timestamps.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::error::{DbError, DbResult};
use strata_core::SyncContext;

/// Last global revision returned by a push.
pub const LAST_REVISION_KEY: &str = "last_revision";
/// JSON-encoded [`SyncContext`].
pub const SYNC_CONTEXT_KEY: &str = "sync_context";
/// RFC 3339 time of the last successful pull (server clock when provided).
pub const LAST_PULL_AT_KEY: &str = "last_pull_at";
/// RFC 3339 time of the last successful push.
pub const LAST_PUSH_AT_KEY: &str = "last_push_at";

pub(crate) async fn put_state<'e, E>(executor: E, key: &str, value: &str) -> DbResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO sync_state (key, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(())
}

/// Repository for sync bookkeeping.
#[derive(Debug, Clone)]
pub struct StateRepository {
    pool: SqlitePool,
}

impl StateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StateRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        put_state(&self.pool, key, value).await
    }

    pub async fn remove(&self, key: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM sync_state WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Last acknowledged global revision, `None` before the first push.
    pub async fn last_revision(&self) -> DbResult<Option<String>> {
        self.get(LAST_REVISION_KEY).await
    }

    pub async fn set_last_revision(&self, revision: &str) -> DbResult<()> {
        self.set(LAST_REVISION_KEY, revision).await
    }

    /// Stored scoping context, `None` if the device never chose one.
    pub async fn sync_context(&self) -> DbResult<Option<SyncContext>> {
        match self.get(SYNC_CONTEXT_KEY).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn set_sync_context(&self, context: &SyncContext) -> DbResult<()> {
        let text = serde_json::to_string(context)?;
        self.set(SYNC_CONTEXT_KEY, &text).await
    }

    pub async fn last_pull_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.get_time(LAST_PULL_AT_KEY).await
    }

    pub async fn set_last_pull_at(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.set(LAST_PULL_AT_KEY, &at.to_rfc3339()).await
    }

    pub async fn last_push_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.get_time(LAST_PUSH_AT_KEY).await
    }

    pub async fn set_last_push_at(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.set(LAST_PUSH_AT_KEY, &at.to_rfc3339()).await
    }

    async fn get_time(&self, key: &str) -> DbResult<Option<DateTime<Utc>>> {
        let Some(text) = self.get(key).await? else {
            return Ok(None);
        };

        DateTime::parse_from_rfc3339(&text)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| DbError::corrupt("sync_state", key, e))
    }
}
