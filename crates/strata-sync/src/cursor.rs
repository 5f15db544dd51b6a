//! # Cursor Tracker
//!
//! Computes the per-table pull cursors: the highest version token held
//! locally, or the sentinel for an empty table.
//!
//! Scans are independent. A table whose scan fails is left out of the
//! request for this cycle rather than sent with the sentinel, so a local
//! read error never triggers a full re-download.

use futures::future::join_all;
use tracing::{debug, warn};

use strata_core::{SyncCursor, TableName};
use strata_db::Database;

use crate::error::SyncResult;

#[derive(Debug, Clone)]
pub struct CursorTracker {
    db: Database,
}

impl CursorTracker {
    pub fn new(db: Database) -> Self {
        CursorTracker { db }
    }

    /// Highest version stored for `table`; the sentinel when it is empty.
    pub async fn latest_cursor(&self, table: &TableName) -> SyncResult<SyncCursor> {
        let version = self.db.records().latest_version(table.as_str()).await?;
        debug!(table = %table, rv = %version, "Computed cursor");
        Ok(SyncCursor::new(table.clone(), version))
    }

    /// Cursors for every table, scanned concurrently. Failed scans are
    /// logged and dropped; the result keeps the input order.
    pub async fn latest_cursors(&self, tables: &[TableName]) -> Vec<SyncCursor> {
        let scans = tables.iter().map(|table| self.latest_cursor(table));

        join_all(scans)
            .await
            .into_iter()
            .zip(tables)
            .filter_map(|(result, table)| match result {
                Ok(cursor) => Some(cursor),
                Err(e) => {
                    warn!(table = %table, error = %e, "Cursor scan failed, skipping table this cycle");
                    None
                }
            })
            .collect()
    }
}
