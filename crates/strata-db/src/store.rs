//! # Store Transactions
//!
//! The only write path into `records`. Every transaction carries a
//! [`WriteOrigin`] fixed at `begin`, and that origin alone decides whether
//! writes are journaled for push.
//!
//! ## Two Observers, Two Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Write Path                                           │
//! │                                                                         │
//! │  begin(origin)                                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  upsert / upsert_if_newer / patch / delete                              │
//! │       │                                                                 │
//! │       ├── origin == Local ─► INSERT sync_changes  (same SQL tx)         │
//! │       └── origin == Sync  ─► no journal entry                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  commit()                                                               │
//! │       │                                                                 │
//! │       └── ANY origin ─► CommitEvent { origin, tables } to subscribers   │
//! │                                                                         │
//! │  Journal capture: suppressed for Sync.                                  │
//! │  Read-side notify: never suppressed.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dropping a transaction without committing rolls it back.
//!
//! While a transaction is open it holds a pooled connection. Do not use the
//! pool-backed repositories until it is committed: an in-memory store has a
//! single connection.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use sqlx::{Sqlite, Transaction};
use tokio::sync::{broadcast, OwnedSemaphorePermit};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{changes, records, state};
use strata_core::{apply_mods, compute_mods, ChangeType, CommitEvent, Row, TableName, WriteOrigin};

/// Result of one row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Row did not exist and was created.
    Inserted,
    /// Existing row was overwritten.
    Updated,
    /// Incoming row equals the stored one; nothing written.
    Unchanged,
    /// Row removed.
    Deleted,
    /// Delete or patch of a row that does not exist.
    Missing,
    /// Incoming version is older than the stored one; nothing written.
    Skipped,
}

impl WriteOutcome {
    /// True if the row in the store changed.
    pub const fn is_write(&self) -> bool {
        matches!(self, WriteOutcome::Inserted | WriteOutcome::Updated | WriteOutcome::Deleted)
    }
}

/// An open, origin-tagged store transaction.
pub struct StoreTransaction {
    tx: Transaction<'static, Sqlite>,
    // Declared after `tx` so the write gate opens once the rollback is queued.
    _permit: OwnedSemaphorePermit,
    origin: WriteOrigin,
    touched: BTreeSet<TableName>,
    events: broadcast::Sender<CommitEvent>,
}

impl StoreTransaction {
    pub(crate) fn new(
        tx: Transaction<'static, Sqlite>,
        permit: OwnedSemaphorePermit,
        origin: WriteOrigin,
        events: broadcast::Sender<CommitEvent>,
    ) -> Self {
        StoreTransaction {
            tx,
            _permit: permit,
            origin,
            touched: BTreeSet::new(),
            events,
        }
    }

    pub fn origin(&self) -> WriteOrigin {
        self.origin
    }

    /// Reads a row through this transaction (sees uncommitted writes).
    pub async fn get(&mut self, table: &str, key: &str) -> DbResult<Option<Row>> {
        records::fetch_row(&mut *self.tx, table, key).await
    }

    /// Inserts or overwrites a row.
    ///
    /// An empty version keeps the stored row's version, so local edits don't
    /// clear the server token.
    pub async fn upsert(&mut self, row: Row) -> DbResult<WriteOutcome> {
        let before = records::fetch_row(&mut *self.tx, row.table.as_str(), &row.key).await?;

        let mut row = row;
        if row.version.is_empty() {
            if let Some(before) = &before {
                row.version = before.version;
            }
        }

        self.write(row, before).await
    }

    /// Inserts or overwrites a row unless the stored version is newer.
    ///
    /// Equal versions overwrite, so reapplying the same data is a no-op.
    pub async fn upsert_if_newer(&mut self, row: Row) -> DbResult<WriteOutcome> {
        let stored = records::fetch_version(&mut *self.tx, row.table.as_str(), &row.key).await?;
        if let Some(stored) = stored {
            if stored > row.version {
                debug!(
                    table = %row.table,
                    key = %row.key,
                    stored = %stored,
                    incoming = %row.version,
                    "Skipping older row"
                );
                return Ok(WriteOutcome::Skipped);
            }
        }

        let before = match stored {
            Some(_) => records::fetch_row(&mut *self.tx, row.table.as_str(), &row.key).await?,
            None => None,
        };
        self.write(row, before).await
    }

    /// Applies a field patch (dotted paths allowed) to an existing row.
    pub async fn patch(&mut self, table: &str, key: &str, mods: &Map<String, Value>) -> DbResult<WriteOutcome> {
        let Some(before) = records::fetch_row(&mut *self.tx, table, key).await? else {
            return Ok(WriteOutcome::Missing);
        };

        let mut data = before.data.clone();
        apply_mods(&mut data, mods);
        let row = Row::new(before.table.clone(), key, before.version, data);

        self.write(row, Some(before)).await
    }

    /// Removes a row. Deleting a missing row records nothing.
    pub async fn delete(&mut self, table: &str, key: &str) -> DbResult<WriteOutcome> {
        let Some(before) = records::fetch_row(&mut *self.tx, table, key).await? else {
            return Ok(WriteOutcome::Missing);
        };

        records::delete_row(&mut *self.tx, table, key).await?;

        if self.origin.is_local() {
            changes::insert_change(
                &mut *self.tx,
                ChangeType::Delete,
                table,
                key,
                None,
                None,
                Some(&before.data),
            )
            .await?;
        }

        self.touched.insert(before.table);
        Ok(WriteOutcome::Deleted)
    }

    /// Removes journal entries, e.g. after the server accepted them.
    pub async fn acknowledge_changes(&mut self, ids: &[i64]) -> DbResult<u64> {
        changes::delete_changes(&mut self.tx, ids).await
    }

    /// Drops the journal entries for one row up to and including `up_to_id`.
    /// Later edits to the row stay pending.
    pub async fn discard_changes_for(&mut self, table: &str, key: &str, up_to_id: i64) -> DbResult<u64> {
        changes::delete_changes_for(&mut self.tx, table, key, up_to_id).await
    }

    /// Writes a bookkeeping value atomically with the row writes.
    pub async fn set_sync_state(&mut self, key: &str, value: &str) -> DbResult<()> {
        state::put_state(&mut *self.tx, key, value).await
    }

    /// Commits and notifies subscribers of the touched tables.
    pub async fn commit(self) -> DbResult<()> {
        let StoreTransaction {
            tx,
            _permit: permit,
            origin,
            touched,
            events,
        } = self;

        tx.commit().await?;
        drop(permit);

        if !touched.is_empty() {
            debug!(origin = ?origin, tables = touched.len(), "Store commit");
            // No subscribers is fine.
            let _ = events.send(CommitEvent {
                origin,
                tables: touched,
            });
        }

        Ok(())
    }

    /// Rolls back explicitly. Subscribers are not notified.
    pub async fn rollback(self) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn write(&mut self, row: Row, before: Option<Row>) -> DbResult<WriteOutcome> {
        if let Some(before) = &before {
            if before.version == row.version && before.data == row.data {
                return Ok(WriteOutcome::Unchanged);
            }
        }

        records::upsert_row(&mut *self.tx, &row).await?;

        if self.origin.is_local() {
            match &before {
                None => {
                    changes::insert_change(
                        &mut *self.tx,
                        ChangeType::Create,
                        row.table.as_str(),
                        &row.key,
                        Some(&row.data),
                        None,
                        None,
                    )
                    .await?;
                }
                Some(before) => {
                    let mods = Value::Object(compute_mods(&before.data, &row.data));
                    changes::insert_change(
                        &mut *self.tx,
                        ChangeType::Update,
                        row.table.as_str(),
                        &row.key,
                        Some(&row.data),
                        Some(&mods),
                        Some(&before.data),
                    )
                    .await?;
                }
            }
        }

        let outcome = if before.is_some() {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Inserted
        };
        self.touched.insert(row.table);
        Ok(outcome)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
