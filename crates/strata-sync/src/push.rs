//! # Push / Reconcile Coordinator
//!
//! Uploads the pending change journal and applies the server's answer.
//!
//! ## Push Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Push Cycle                                     │
//! │                                                                         │
//! │  1. LOAD (pool reads)                                                  │
//! │     pending changes (oldest first, ≤ batch_size)                       │
//! │     last_revision, sync_context                                        │
//! │                                                                         │
//! │  2. SEND   PushRequest ──────────────► server                          │
//! │            transport error ─► return Err, journal untouched            │
//! │                                                                         │
//! │  3. RECONCILE (one Sync transaction)                                   │
//! │     a. server changes      create/update ─► upsert                      │
//! │                            mods only     ─► patch                       │
//! │                            delete        ─► delete                      │
//! │     b. conflicts           serverData    ─► overwrite local row         │
//! │     c. acknowledge         every sent change id                        │
//! │     d. last_revision       ◄─ currentRevision                          │
//! │     commit                                                              │
//! │                                                                         │
//! │  4. REPORT  ReconcileOutcome { ..., partial }                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Conflicts are resolved server-wins. A conflicted change is dropped, not
//! retried; without `serverData` the local row waits for the next pull.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use strata_core::{ChangeType, Row, SyncContext, TableRegistry, TableSpec, VersionToken, WriteOrigin};
use strata_db::repository::state::{LAST_PUSH_AT_KEY, LAST_REVISION_KEY};
use strata_db::{Database, StoreTransaction, WriteOutcome};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::protocol::{ChangeMessage, ConflictMessage, PushRequest};
use crate::transport::SyncRpc;

/// Result of one push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Local changes sent.
    pub sent: usize,
    /// Sent changes the server accepted, removed from the journal.
    pub acknowledged: u64,
    /// Journal entries dropped because the server reported a conflict.
    pub discarded: u64,
    /// Server changes written locally.
    pub server_changes_applied: usize,
    /// Server changes that were invalid, for unknown tables, or no-ops.
    pub server_changes_skipped: usize,
    /// Conflicts reported by the server.
    pub conflicts: usize,
    /// Revision stored after this push.
    pub revision: Option<String>,
    /// Server has more; run another cycle.
    pub partial: bool,
    pub message: Option<String>,
}

pub struct PushCoordinator {
    db: Database,
    rpc: Arc<dyn SyncRpc>,
    registry: Arc<TableRegistry>,
    batch_size: u32,
    push_when_empty: bool,
    default_context: SyncContext,
}

impl PushCoordinator {
    pub fn new(db: Database, rpc: Arc<dyn SyncRpc>, registry: Arc<TableRegistry>, config: &SyncConfig) -> Self {
        PushCoordinator {
            db,
            rpc,
            registry,
            batch_size: config.sync.batch_size,
            push_when_empty: config.sync.push_when_empty,
            default_context: config.default_context(),
        }
    }

    /// Runs one push and reconciles the response.
    ///
    /// ## Errors
    /// Transport and protocol errors are returned before anything local
    /// changes. Store errors during reconcile roll the transaction back, so
    /// the journal and revision stay as they were.
    pub async fn push(&self) -> SyncResult<ReconcileOutcome> {
        let pending = self.db.changes().pending(self.batch_size).await?;

        if pending.is_empty() && !self.push_when_empty {
            debug!("No pending changes, skipping push");
            return Ok(ReconcileOutcome::default());
        }

        let state = self.db.sync_state();
        let last_revision = state.last_revision().await?;
        let sync_context = match state.sync_context().await? {
            Some(context) => context,
            None => self.default_context.clone(),
        };

        let request = PushRequest {
            client_changes: pending.iter().map(ChangeMessage::from).collect(),
            last_revision: last_revision.clone(),
            sync_context,
        };
        let sent_ids: Vec<i64> = pending.iter().map(|change| change.id).collect();

        info!(
            changes = request.client_changes.len(),
            last_revision = ?last_revision,
            "Starting push"
        );

        let response = self.rpc.push(&request).await?;
        let server_changes = response.server_changes();

        let mut outcome = ReconcileOutcome {
            sent: sent_ids.len(),
            conflicts: response.conflicts.len(),
            partial: response.partial,
            message: response.message.clone(),
            ..Default::default()
        };
        // Malformed entries were dropped by server_changes()
        outcome.server_changes_skipped = response.changes.len() - server_changes.len();

        let mut tx = self.db.begin(WriteOrigin::Sync).await?;

        for change in &server_changes {
            if self.apply_server_change(&mut tx, change).await? {
                outcome.server_changes_applied += 1;
            } else {
                outcome.server_changes_skipped += 1;
            }
        }

        // Conflicted rows drop every sent change for that row; later edits stay pending.
        let last_sent = sent_ids.iter().copied().max();
        let mut conflicted = HashSet::new();
        for conflict in &response.conflicts {
            self.resolve_conflict(&mut tx, conflict).await?;
            if let Some(up_to_id) = last_sent {
                outcome.discarded += tx.discard_changes_for(&conflict.table, &conflict.key, up_to_id).await?;
            }
            conflicted.insert((conflict.table.as_str(), conflict.key.as_str()));
        }

        let acknowledged: Vec<i64> = pending
            .iter()
            .filter(|change| !conflicted.contains(&(change.table.as_str(), change.key.as_str())))
            .map(|change| change.id)
            .collect();
        outcome.acknowledged = tx.acknowledge_changes(&acknowledged).await?;

        outcome.revision = match &response.current_revision {
            Some(revision) => {
                tx.set_sync_state(LAST_REVISION_KEY, revision).await?;
                Some(revision.clone())
            }
            None => last_revision,
        };
        tx.set_sync_state(LAST_PUSH_AT_KEY, &Utc::now().to_rfc3339()).await?;

        tx.commit().await?;

        if let Some(message) = &outcome.message {
            info!(message = %message, "Server message");
        }
        info!(
            sent = outcome.sent,
            applied = outcome.server_changes_applied,
            conflicts = outcome.conflicts,
            revision = ?outcome.revision,
            partial = outcome.partial,
            "Push complete"
        );

        Ok(outcome)
    }

    /// Returns true if the change wrote to the store.
    async fn apply_server_change(&self, tx: &mut StoreTransaction, change: &ChangeMessage) -> SyncResult<bool> {
        let Some(spec) = self.registry.get(&change.table) else {
            warn!(table = %change.table, key = %change.key, "Server change for unregistered table");
            return Ok(false);
        };

        let outcome = match (change.change_type, &change.obj, &change.mods) {
            (ChangeType::Delete, _, _) => tx.delete(spec.name.as_str(), &change.key).await?,
            (_, Some(obj), _) => tx.upsert(server_row(spec, &change.key, obj.clone())).await?,
            (ChangeType::Update, None, Some(mods)) => tx.patch(spec.name.as_str(), &change.key, mods).await?,
            _ => {
                warn!(
                    table = %change.table,
                    key = %change.key,
                    kind = change.change_type.as_str(),
                    "Server change has no payload"
                );
                return Ok(false);
            }
        };

        if outcome == WriteOutcome::Missing {
            debug!(table = %change.table, key = %change.key, "Server change targets a missing row");
        }

        Ok(outcome.is_write())
    }

    async fn resolve_conflict(&self, tx: &mut StoreTransaction, conflict: &ConflictMessage) -> SyncResult<()> {
        warn!(
            table = %conflict.table,
            key = %conflict.key,
            client_version = ?conflict.client_version,
            server_version = ?conflict.server_version,
            reason = %conflict.reason,
            "Conflict, server wins"
        );

        let Some(spec) = self.registry.get(&conflict.table) else {
            warn!(table = %conflict.table, "Conflict for unregistered table");
            return Ok(());
        };

        match &conflict.server_data {
            Some(data) => {
                tx.upsert(server_row(spec, &conflict.key, data.clone())).await?;
            }
            None => {
                debug!(table = %conflict.table, key = %conflict.key, "No server data, row refreshed on next pull");
            }
        }

        Ok(())
    }
}

/// Row from a server payload. The message key addresses the row; the
/// version comes from the payload's version field.
fn server_row(spec: &TableSpec, key: &str, obj: Value) -> Row {
    let version = VersionToken::decode(obj.get(&spec.version_field).and_then(Value::as_str));
    Row::new(spec.name.clone(), key, version, obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::PushResponse;
    use crate::transport::MockRpc;
    use serde_json::json;
    use strata_db::DbConfig;

    async fn setup(config: SyncConfig) -> (Database, Arc<MockRpc>, PushCoordinator) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let rpc = Arc::new(MockRpc::new());
        let registry = Arc::new(config.registry().unwrap());
        let push = PushCoordinator::new(db.clone(), rpc.clone(), registry, &config);
        (db, rpc, push)
    }

    async fn local_edit(db: &Database, key: &str, depth: i64) {
        let mut tx = db.begin(WriteOrigin::Local).await.unwrap();
        tx.upsert(Row::new("Collar", key, VersionToken::EMPTY, json!({ "CollarId": key, "Depth": depth })))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_journal_without_push_when_empty() {
        let mut config = SyncConfig::default();
        config.sync.push_when_empty = false;
        let (_db, rpc, push) = setup(config).await;

        let outcome = push.push().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::default());
        assert!(rpc.push_requests().is_empty());
    }

    #[tokio::test]
    async fn test_push_sends_context_and_acknowledges() {
        let mut config = SyncConfig::default();
        config.scope.program_ids = vec!["DP-1".into()];
        let (db, rpc, push) = setup(config).await;

        local_edit(&db, "C1", 10).await;
        local_edit(&db, "C2", 20).await;

        rpc.queue_push(PushResponse {
            current_revision: Some("7".into()),
            ..Default::default()
        });

        let outcome = push.push().await.unwrap();
        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.acknowledged, 2);
        assert_eq!(outcome.revision.as_deref(), Some("7"));

        let request = &rpc.push_requests()[0];
        assert_eq!(request.last_revision, None);
        assert_eq!(request.sync_context.selected_program_ids, vec!["DP-1"]);
        assert_eq!(request.client_changes[0].change_type, ChangeType::Create);

        assert_eq!(db.changes().count_pending().await.unwrap(), 0);
        assert_eq!(db.sync_state().last_revision().await.unwrap().as_deref(), Some("7"));
        assert!(db.sync_state().last_push_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_server_changes_are_applied_without_journal() {
        let (db, rpc, push) = setup(SyncConfig::default()).await;

        let mut tx = db.begin(WriteOrigin::Sync).await.unwrap();
        tx.upsert(Row::new("Collar", "C9", VersionToken::from_u64(4), json!({ "CollarId": "C9", "Depth": 1 })))
            .await
            .unwrap();
        tx.upsert(Row::new("Collar", "C8", VersionToken::from_u64(4), json!({ "CollarId": "C8" })))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        rpc.queue_push(PushResponse {
            changes: vec![
                json!({ "type": 1, "table": "Collar", "key": "C1", "obj": { "CollarId": "C1", "Depth": 5 } }),
                json!({ "type": 2, "table": "Collar", "key": "C9", "mods": { "Depth": 2, "Survey.Azimuth": 90 } }),
                json!({ "type": 3, "table": "Collar", "key": "C8" }),
                json!({ "type": 2, "table": "Collar", "key": "Nope", "mods": { "Depth": 1 } }),
                json!({ "type": 1, "table": "Unregistered", "key": "X", "obj": {} }),
                json!({ "bogus": true })
            ],
            current_revision: Some("12".into()),
            ..Default::default()
        });

        let outcome = push.push().await.unwrap();
        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.server_changes_applied, 3);
        assert_eq!(outcome.server_changes_skipped, 3);

        let records = db.records();
        assert_eq!(records.get("Collar", "C1").await.unwrap().unwrap().data["Depth"], 5);
        let patched = records.get("Collar", "C9").await.unwrap().unwrap();
        assert_eq!(patched.data["Depth"], 2);
        assert_eq!(patched.data["Survey"]["Azimuth"], 90);
        assert_eq!(patched.version, VersionToken::from_u64(4));
        assert!(records.get("Collar", "C8").await.unwrap().is_none());

        assert_eq!(db.changes().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conflict_without_server_data_keeps_row() {
        let (db, rpc, push) = setup(SyncConfig::default()).await;
        local_edit(&db, "K1", 10).await;

        rpc.queue_push(PushResponse {
            current_revision: Some("3".into()),
            conflicts: vec![ConflictMessage {
                table: "Collar".into(),
                key: "K1".into(),
                client_version: None,
                server_version: Some("AAAAAAAAAAk=".into()),
                reason: "Deleted on server".into(),
                server_data: None,
            }],
            ..Default::default()
        });

        let outcome = push.push().await.unwrap();
        assert_eq!(outcome.conflicts, 1);
        assert_eq!(db.changes().count_pending().await.unwrap(), 0);
        assert_eq!(db.records().get("Collar", "K1").await.unwrap().unwrap().data["Depth"], 10);
    }

    #[tokio::test]
    async fn test_conflict_keeps_edits_outside_the_batch() {
        let mut config = SyncConfig::default();
        config.sync.batch_size = 2;
        let (db, rpc, push) = setup(config).await;

        local_edit(&db, "K2", 20).await;
        local_edit(&db, "K1", 10).await;
        local_edit(&db, "K1", 11).await;

        rpc.queue_push(PushResponse {
            conflicts: vec![ConflictMessage {
                table: "Collar".into(),
                key: "K1".into(),
                client_version: None,
                server_version: None,
                reason: "Row modified on server".into(),
                server_data: None,
            }],
            ..Default::default()
        });

        let outcome = push.push().await.unwrap();
        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.acknowledged, 1);
        assert_eq!(outcome.discarded, 1);

        let left = db.changes().pending(10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, "K1");
        assert_eq!(left[0].mods.as_ref().unwrap()["Depth"], 11);
    }

    #[tokio::test]
    async fn test_stored_context_overrides_config_scope() {
        let mut config = SyncConfig::default();
        config.scope.program_ids = vec!["DP-1".into()];
        let (db, rpc, push) = setup(config).await;

        let stored = SyncContext {
            selected_program_ids: vec!["DP-2".into()],
            selected_collar_ids: vec!["K7".into()],
        };
        db.sync_state().set_sync_context(&stored).await.unwrap();

        push.push().await.unwrap();

        assert_eq!(rpc.push_requests()[0].sync_context, stored);
    }

    #[tokio::test]
    async fn test_transport_error_leaves_journal() {
        let (db, rpc, push) = setup(SyncConfig::default()).await;
        local_edit(&db, "C1", 10).await;

        rpc.fail_push(SyncError::HttpStatus {
            status: 503,
            body: "maintenance".into(),
        });

        let err = push.push().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(db.changes().count_pending().await.unwrap(), 1);
        assert_eq!(db.sync_state().last_revision().await.unwrap(), None);
    }
}
