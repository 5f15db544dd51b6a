//! # Pull Coordinator
//!
//! Incremental download of server rows, one cursor per table.
//!
//! ## Pull Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Pull Cycle                                     │
//! │                                                                         │
//! │  1. CURSORS (concurrent)                                               │
//! │     Lookup_HoleStatus → "AAAAAAAAB9E="                                 │
//! │     Collar            → ""            (empty table: everything)        │
//! │                                                                         │
//! │  2. ONE REMOTE CALL                                                    │
//! │     PullRequest { tables: [...] } ──► PullResponse { results: [...] }  │
//! │                                                                         │
//! │  3. MERGE (concurrent, one Sync transaction per table)                 │
//! │     ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │     │ Lookup_HoleStatus│  │ Collar           │  │ Lookup_Prospect  │   │
//! │     │ upsert_if_newer  │  │ error from server│  │ merge failed     │   │
//! │     │ commit           │  │ skip             │  │ rollback         │   │
//! │     └──────────────────┘  └──────────────────┘  └──────────────────┘   │
//! │     Applied               Failed                Failed                 │
//! │                                                                         │
//! │  A failed table keeps its previous rows; siblings are unaffected.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Merges go through [`WriteOrigin::Sync`] transactions, so nothing pulled
//! is ever journaled for push. Record decoding runs concurrently; the store
//! admits one transaction at a time, so merge commits queue behind each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use strata_core::{Row, TableName, TableRegistry, TableSpec, VersionToken, WriteOrigin};
use strata_db::{Database, WriteOutcome};

use crate::cursor::CursorTracker;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{PullRequest, TableResult};
use crate::transport::SyncRpc;

// =============================================================================
// Report Types
// =============================================================================

/// Row counts from merging one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records in the server result.
    pub received: usize,
    /// Rows inserted or overwritten.
    pub written: usize,
    /// Rows identical to what was stored.
    pub unchanged: usize,
    /// Rows older than the stored version.
    pub skipped: usize,
    /// Records without a usable key.
    pub invalid: usize,
}

/// What happened to one table in a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Applied(MergeStats),
    Failed { error: String },
    /// Requested but absent from the response.
    NotReturned,
}

impl TableOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TableOutcome::Failed { .. })
    }
}

/// Result of one pull cycle.
#[derive(Debug, Clone, Default)]
pub struct PullReport {
    pub tables: BTreeMap<TableName, TableOutcome>,
    /// Total records the server reported.
    pub total_records: u64,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl PullReport {
    pub fn failed_tables(&self) -> Vec<TableName> {
        self.tables
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(table, _)| table.clone())
            .collect()
    }

    pub fn rows_written(&self) -> usize {
        self.tables
            .values()
            .map(|outcome| match outcome {
                TableOutcome::Applied(stats) => stats.written,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.tables.get(&TableName::from(table))
    }
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct PullCoordinator {
    db: Database,
    rpc: Arc<dyn SyncRpc>,
    registry: Arc<TableRegistry>,
    cursors: CursorTracker,
}

impl PullCoordinator {
    pub fn new(db: Database, rpc: Arc<dyn SyncRpc>, registry: Arc<TableRegistry>) -> Self {
        let cursors = CursorTracker::new(db.clone());
        PullCoordinator {
            db,
            rpc,
            registry,
            cursors,
        }
    }

    /// Pulls every registered table.
    pub async fn pull_all(&self) -> SyncResult<PullReport> {
        let tables = self.registry.names();
        self.pull(&tables).await
    }

    /// Pulls `tables` in one remote call.
    ///
    /// ## Errors
    /// * [`SyncError::UnknownTable`] if a requested table is not registered
    /// * Transport errors abort the whole cycle; nothing is written
    ///
    /// Per-table failures are reported in the [`PullReport`], not returned.
    pub async fn pull(&self, tables: &[TableName]) -> SyncResult<PullReport> {
        for table in tables {
            self.registry.require(table.as_str())?;
        }

        let mut report = PullReport::default();

        let cursors = self.cursors.latest_cursors(tables).await;
        for table in tables {
            if !cursors.iter().any(|c| &c.table == table) {
                report.tables.insert(
                    table.clone(),
                    TableOutcome::Failed {
                        error: "local cursor scan failed".into(),
                    },
                );
            }
        }

        if cursors.is_empty() {
            debug!("No tables to pull");
            return Ok(report);
        }

        info!(tables = cursors.len(), "Starting pull");

        let request = PullRequest::from_cursors(&cursors);
        let response = self.rpc.pull(&request).await?;

        report.total_records = response.total_records;
        report.server_timestamp = response.timestamp;

        let mut results: BTreeMap<TableName, TableResult> = BTreeMap::new();
        for result in response.results {
            let name = TableName::from(result.table_name.as_str());
            if !self.registry.contains(name.as_str()) {
                warn!(table = %name, "Ignoring result for unregistered table");
                continue;
            }
            if !cursors.iter().any(|c| c.table == name) {
                warn!(table = %name, "Ignoring result for table that was not requested");
                continue;
            }
            if results.contains_key(&name) {
                warn!(table = %name, "Ignoring duplicate result for table");
                continue;
            }
            results.insert(name, result);
        }

        let merges = results.into_iter().map(|(table, result)| async move {
            let outcome = self.apply_result(&table, result).await;
            (table, outcome)
        });

        for (table, outcome) in join_all(merges).await {
            report.tables.insert(table, outcome);
        }

        for cursor in &cursors {
            report
                .tables
                .entry(cursor.table.clone())
                .or_insert_with(|| {
                    debug!(table = %cursor.table, "Table missing from pull response");
                    TableOutcome::NotReturned
                });
        }

        let pulled_at = report.server_timestamp.unwrap_or_else(Utc::now);
        self.db.sync_state().set_last_pull_at(pulled_at).await?;

        info!(
            tables = report.tables.len(),
            written = report.rows_written(),
            failed = report.failed_tables().len(),
            "Pull complete"
        );

        Ok(report)
    }

    async fn apply_result(&self, table: &TableName, result: TableResult) -> TableOutcome {
        if let Some(error) = result.error {
            warn!(table = %table, error = %error, "Server reported table error, keeping local rows");
            return TableOutcome::Failed { error };
        }

        let Some(spec) = self.registry.get(table.as_str()) else {
            return TableOutcome::Failed {
                error: format!("Unknown table: {}", table),
            };
        };

        match self.merge_table(spec, result.records).await {
            Ok(stats) => {
                debug!(
                    table = %table,
                    received = stats.received,
                    written = stats.written,
                    skipped = stats.skipped,
                    "Table merged"
                );
                TableOutcome::Applied(stats)
            }
            Err(e) => {
                let e = SyncError::TableSyncFailed {
                    table: table.to_string(),
                    reason: e.to_string(),
                };
                error!(error = %e, "Table merge rolled back");
                TableOutcome::Failed { error: e.to_string() }
            }
        }
    }

    /// Merges one table's records in receipt order inside a single Sync
    /// transaction. Any store error rolls the whole table back.
    async fn merge_table(&self, spec: &TableSpec, records: Vec<Value>) -> SyncResult<MergeStats> {
        let mut stats = MergeStats {
            received: records.len(),
            ..Default::default()
        };

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            if let Some(raw) = record.get(&spec.version_field).and_then(Value::as_str) {
                if let Err(e) = VersionToken::try_decode(raw) {
                    if !raw.is_empty() {
                        warn!(table = %spec.name, rv = %raw, error = %e, "Malformed version token, treating as empty");
                    }
                }
            }

            match Row::from_object(spec, record) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(table = %spec.name, error = %e, "Skipping record");
                    stats.invalid += 1;
                }
            }
        }

        let mut tx = self.db.begin(WriteOrigin::Sync).await?;

        for row in rows {
            match tx.upsert_if_newer(row).await? {
                WriteOutcome::Skipped => stats.skipped += 1,
                WriteOutcome::Unchanged => stats.unchanged += 1,
                _ => stats.written += 1,
            }
        }

        tx.commit().await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PullResponse;
    use crate::transport::MockRpc;
    use serde_json::json;
    use strata_db::DbConfig;

    async fn setup() -> (Database, Arc<MockRpc>, PullCoordinator) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let rpc = Arc::new(MockRpc::new());
        let registry = Arc::new(TableRegistry::builtin().unwrap());
        let pull = PullCoordinator::new(db.clone(), rpc.clone(), registry);
        (db, rpc, pull)
    }

    fn result(table: &str, records: Vec<Value>) -> TableResult {
        TableResult {
            table_name: table.into(),
            count: records.len() as u64,
            records,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_requested_table_is_rejected() {
        let (_db, rpc, pull) = setup().await;
        let err = pull.pull(&[TableName::from("NotATable")]).await.unwrap_err();
        assert!(matches!(err, SyncError::UnknownTable(_)));
        assert!(rpc.pull_requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_and_older_records_are_counted() {
        let (db, rpc, pull) = setup().await;
        let table = "Lookup_HoleStatus";

        let mut tx = db.begin(WriteOrigin::Sync).await.unwrap();
        tx.upsert(Row::new(table, "DRL", VersionToken::from_u64(50), json!({ "Code": "DRL", "Description": "Drilled" })))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let older = VersionToken::from_u64(10).encode();
        rpc.queue_pull(PullResponse {
            results: vec![result(
                table,
                vec![
                    json!({ "Code": "DRL", "Description": "Stale", "rv": older }),
                    json!({ "Description": "No key" }),
                    json!({ "Code": "ABD", "Description": "Abandoned", "rv": "%%%" }),
                ],
            )],
            total_records: 3,
            timestamp: None,
        });

        let report = pull.pull(&[TableName::from(table)]).await.unwrap();
        let Some(TableOutcome::Applied(stats)) = report.outcome(table) else {
            panic!("expected applied outcome");
        };
        assert_eq!(stats.received, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.invalid, 1);
        assert_eq!(stats.written, 1);

        let kept = db.records().get(table, "DRL").await.unwrap().unwrap();
        assert_eq!(kept.data["Description"], "Drilled");

        // Malformed token falls back to the sentinel
        let abd = db.records().get(table, "ABD").await.unwrap().unwrap();
        assert!(abd.version.is_empty());

        assert!(db.sync_state().last_pull_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_and_unrequested_results() {
        let (_db, rpc, pull) = setup().await;

        rpc.queue_pull(PullResponse {
            results: vec![
                result("Collar", vec![]),
                result("Bogus", vec![json!({ "Code": "X" })]),
            ],
            total_records: 0,
            timestamp: None,
        });

        let report = pull
            .pull(&[TableName::from("Lookup_HoleStatus"), TableName::from("Collar")])
            .await
            .unwrap();

        assert_eq!(report.outcome("Lookup_HoleStatus"), Some(&TableOutcome::NotReturned));
        assert!(matches!(report.outcome("Collar"), Some(TableOutcome::Applied(_))));
        assert!(report.outcome("Bogus").is_none());
    }
}
