//! End-to-end pull and push cycles against an in-memory store and a mock
//! server.

use std::sync::Arc;

use serde_json::{json, Value};

use strata_core::{ChangeType, Row, TableName, TableRegistry, VersionToken, WriteOrigin};
use strata_db::{Database, DbConfig};
use strata_sync::{
    ConflictMessage, CursorTracker, MockRpc, PullCoordinator, PullResponse, PushCoordinator, PushResponse,
    SyncConfig, SyncError, TableOutcome, TableResult,
};

const HOLE_STATUS: &str = "Lookup_HoleStatus";

struct Harness {
    db: Database,
    rpc: Arc<MockRpc>,
    pull: PullCoordinator,
    push: PushCoordinator,
}

async fn harness() -> Harness {
    let config = SyncConfig::default();
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let rpc = Arc::new(MockRpc::new());
    let registry = Arc::new(config.registry().unwrap());

    Harness {
        pull: PullCoordinator::new(db.clone(), rpc.clone(), registry.clone()),
        push: PushCoordinator::new(db.clone(), rpc.clone(), registry, &config),
        db,
        rpc,
    }
}

fn hole_status(code: &str, description: &str, rv: u64) -> Value {
    json!({
        "Code": code,
        "Description": description,
        "rv": VersionToken::from_u64(rv).encode(),
    })
}

fn table_result(table: &str, records: Vec<Value>) -> TableResult {
    TableResult {
        table_name: table.into(),
        count: records.len() as u64,
        records,
        error: None,
    }
}

fn hole_status_response() -> PullResponse {
    PullResponse {
        results: vec![table_result(
            HOLE_STATUS,
            vec![
                hole_status("DRL", "Drilled", 1000),
                hole_status("PLN", "Planned", 2001),
                hole_status("ABD", "Abandoned", 1500),
            ],
        )],
        total_records: 3,
        timestamp: None,
    }
}

#[tokio::test]
async fn first_sync_pulls_everything_and_advances_cursor() {
    let h = harness().await;
    h.rpc.queue_pull(hole_status_response());

    let report = h.pull.pull(&[TableName::from(HOLE_STATUS)]).await.unwrap();

    let request = &h.rpc.pull_requests()[0];
    assert_eq!(request.tables.len(), 1);
    assert_eq!(request.tables[0].table_name, HOLE_STATUS);
    assert_eq!(request.tables[0].rv, "");

    let Some(TableOutcome::Applied(stats)) = report.outcome(HOLE_STATUS) else {
        panic!("expected {} to be applied", HOLE_STATUS);
    };
    assert_eq!(stats.written, 3);
    assert_eq!(h.db.records().count(HOLE_STATUS).await.unwrap(), 3);

    let cursor = CursorTracker::new(h.db.clone())
        .latest_cursor(&TableName::from(HOLE_STATUS))
        .await
        .unwrap();
    assert_eq!(cursor.encoded(), "AAAAAAAAB9E=");
    assert_eq!(cursor.version, VersionToken::from_u64(2001));
}

#[tokio::test]
async fn second_pull_sends_cursor_and_reapply_is_idempotent() {
    let h = harness().await;
    h.rpc.queue_pull(hole_status_response());
    h.rpc.queue_pull(hole_status_response());

    let tables = [TableName::from(HOLE_STATUS)];
    h.pull.pull(&tables).await.unwrap();
    let before = h.db.records().list(HOLE_STATUS).await.unwrap();

    let report = h.pull.pull(&tables).await.unwrap();
    let after = h.db.records().list(HOLE_STATUS).await.unwrap();

    assert_eq!(h.rpc.pull_requests()[1].tables[0].rv, "AAAAAAAAB9E=");
    assert_eq!(before, after);

    let Some(TableOutcome::Applied(stats)) = report.outcome(HOLE_STATUS) else {
        panic!("expected {} to be applied", HOLE_STATUS);
    };
    assert_eq!(stats.written, 0);
    assert_eq!(stats.unchanged, 3);
}

#[tokio::test]
async fn failed_table_keeps_rows_while_sibling_merges() {
    let h = harness().await;

    let mut tx = h.db.begin(WriteOrigin::Sync).await.unwrap();
    tx.upsert(Row::new(
        "Collar",
        "K7",
        VersionToken::from_u64(10),
        json!({ "CollarId": "K7", "HoleId": "DD001" }),
    ))
    .await
    .unwrap();
    tx.commit().await.unwrap();

    h.rpc.queue_pull(PullResponse {
        results: vec![
            TableResult {
                table_name: "Collar".into(),
                count: 0,
                records: vec![],
                error: Some("query timeout".into()),
            },
            table_result(HOLE_STATUS, vec![hole_status("DRL", "Drilled", 5)]),
        ],
        total_records: 1,
        timestamp: None,
    });

    let report = h
        .pull
        .pull(&[TableName::from("Collar"), TableName::from(HOLE_STATUS)])
        .await
        .unwrap();

    assert_eq!(report.failed_tables(), vec![TableName::from("Collar")]);
    assert!(matches!(report.outcome(HOLE_STATUS), Some(TableOutcome::Applied(_))));

    let collar = h.db.records().get("Collar", "K7").await.unwrap().unwrap();
    assert_eq!(collar.data["HoleId"], "DD001");
    assert_eq!(h.db.records().count(HOLE_STATUS).await.unwrap(), 1);
}

#[tokio::test]
async fn pull_never_moves_a_row_backwards() {
    let h = harness().await;
    h.rpc.queue_pull(PullResponse {
        results: vec![table_result(HOLE_STATUS, vec![hole_status("DRL", "Drilled v2", 20)])],
        ..Default::default()
    });
    h.rpc.queue_pull(PullResponse {
        results: vec![table_result(HOLE_STATUS, vec![hole_status("DRL", "Drilled v1", 10)])],
        ..Default::default()
    });

    let tables = [TableName::from(HOLE_STATUS)];
    h.pull.pull(&tables).await.unwrap();
    h.pull.pull(&tables).await.unwrap();

    let row = h.db.records().get(HOLE_STATUS, "DRL").await.unwrap().unwrap();
    assert_eq!(row.data["Description"], "Drilled v2");
    assert_eq!(row.version, VersionToken::from_u64(20));
}

#[tokio::test]
async fn sync_writes_are_never_journaled() {
    let h = harness().await;
    h.rpc.queue_pull(hole_status_response());
    h.rpc.queue_push(PushResponse {
        changes: vec![
            json!({ "type": 1, "table": "Collar", "key": "K1", "obj": { "CollarId": "K1" } }),
            json!({ "type": 2, "table": HOLE_STATUS, "key": "DRL", "mods": { "Description": "Drilled (final)" } }),
        ],
        current_revision: Some("1".into()),
        ..Default::default()
    });

    h.pull.pull_all().await.unwrap();
    let outcome = h.push.push().await.unwrap();

    assert_eq!(outcome.server_changes_applied, 2);
    assert_eq!(h.db.changes().count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn conflict_resolves_to_server_data() {
    let h = harness().await;

    let mut tx = h.db.begin(WriteOrigin::Sync).await.unwrap();
    tx.upsert(Row::new(
        "Collar",
        "K1",
        VersionToken::from_u64(5),
        json!({ "CollarId": "K1", "Depth": 10 }),
    ))
    .await
    .unwrap();
    tx.commit().await.unwrap();
    h.db.sync_state().set_last_revision("100").await.unwrap();

    let mut tx = h.db.begin(WriteOrigin::Local).await.unwrap();
    tx.upsert(Row::new("Collar", "K1", VersionToken::EMPTY, json!({ "CollarId": "K1", "Depth": 12 })))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let server_data = json!({
        "CollarId": "K1",
        "Depth": 30,
        "rv": VersionToken::from_u64(9).encode(),
    });
    h.rpc.queue_push(PushResponse {
        current_revision: Some("101".into()),
        conflicts: vec![ConflictMessage {
            table: "Collar".into(),
            key: "K1".into(),
            client_version: Some(VersionToken::from_u64(5).encode()),
            server_version: Some(VersionToken::from_u64(9).encode()),
            reason: "Row modified on server".into(),
            server_data: Some(server_data.clone()),
        }],
        ..Default::default()
    });

    let outcome = h.push.push().await.unwrap();

    let request = &h.rpc.push_requests()[0];
    assert_eq!(request.last_revision.as_deref(), Some("100"));
    assert_eq!(request.client_changes.len(), 1);
    assert_eq!(request.client_changes[0].change_type, ChangeType::Update);
    assert_eq!(request.client_changes[0].key, "K1");
    assert_eq!(request.client_changes[0].mods.as_ref().unwrap()["Depth"], 12);

    assert_eq!(outcome.conflicts, 1);
    assert_eq!(outcome.revision.as_deref(), Some("101"));

    let row = h.db.records().get("Collar", "K1").await.unwrap().unwrap();
    assert_eq!(row.data, server_data);
    assert_eq!(row.version, VersionToken::from_u64(9));

    assert_eq!(h.db.changes().count_pending().await.unwrap(), 0);
    assert_eq!(h.db.sync_state().last_revision().await.unwrap().as_deref(), Some("101"));
}

#[tokio::test]
async fn transport_failure_mid_push_keeps_journal() {
    let h = harness().await;

    let mut tx = h.db.begin(WriteOrigin::Local).await.unwrap();
    tx.upsert(Row::new("Collar", "K2", VersionToken::EMPTY, json!({ "CollarId": "K2" })))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    h.db.sync_state().set_last_revision("100").await.unwrap();

    let before = h.db.changes().pending(100).await.unwrap();
    h.rpc.fail_push(SyncError::ConnectionFailed("connection reset".into()));

    let err = h.push.push().await.unwrap_err();
    assert!(err.is_transport_error());

    assert_eq!(h.db.changes().pending(100).await.unwrap(), before);
    assert_eq!(h.db.sync_state().last_revision().await.unwrap().as_deref(), Some("100"));
}

#[tokio::test]
async fn subscribers_see_sync_commits() {
    let h = harness().await;
    let mut events = h.db.subscribe();

    h.rpc.queue_pull(hole_status_response());
    h.pull.pull(&[TableName::from(HOLE_STATUS)]).await.unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.origin, WriteOrigin::Sync);
    assert!(event.touches(HOLE_STATUS));
}

#[tokio::test]
async fn config_tables_are_pulled() {
    let mut config = SyncConfig::default();
    config.tables = toml::from_str::<TablesDoc>(
        r#"
        [[tables]]
        name = "Lookup_CoreSize"
        "#,
    )
    .unwrap()
    .tables;

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let rpc = Arc::new(MockRpc::new());
    let registry: Arc<TableRegistry> = Arc::new(config.registry().unwrap());
    let pull = PullCoordinator::new(db.clone(), rpc.clone(), registry);

    rpc.queue_pull(PullResponse {
        results: vec![table_result("Lookup_CoreSize", vec![json!({ "Code": "NQ", "Description": "NQ core" })])],
        ..Default::default()
    });

    pull.pull_all().await.unwrap();

    let requested = &rpc.pull_requests()[0];
    assert!(requested.tables.iter().any(|t| t.table_name == "Lookup_CoreSize"));
    assert_eq!(db.records().count("Lookup_CoreSize").await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_on_file_store_all_apply() {
    const TABLES: [&str; 8] = [
        "Lookup_HoleStatus",
        "Lookup_HoleType",
        "Lookup_HolePurpose",
        "Lookup_DrillType",
        "Lookup_DrillCompany",
        "Lookup_Rig",
        "Lookup_Grid",
        "Lookup_Datum",
    ];

    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig::default();
    let db = Database::new(DbConfig::new(dir.path().join("strata.db")).max_connections(5))
        .await
        .unwrap();
    let rpc = Arc::new(MockRpc::new());
    let pull = PullCoordinator::new(db.clone(), rpc.clone(), Arc::new(config.registry().unwrap()));
    let tables: Vec<TableName> = TABLES.iter().map(|t| TableName::from(*t)).collect();

    for round in 0..3u64 {
        rpc.queue_pull(PullResponse {
            results: TABLES
                .iter()
                .map(|table| {
                    let records = (0..50u64)
                        .map(|i| hole_status(&format!("C{i}"), &format!("{table} r{round}"), round * 100 + i + 1))
                        .collect();
                    table_result(table, records)
                })
                .collect(),
            total_records: 400,
            timestamp: None,
        });

        let report = pull.pull(&tables).await.unwrap();

        assert!(report.failed_tables().is_empty(), "round {round}: {:?}", report.tables);
        for table in TABLES {
            let Some(TableOutcome::Applied(stats)) = report.outcome(table) else {
                panic!("round {round}: expected {table} to be applied");
            };
            assert_eq!(stats.written, 50);
        }
    }

    for table in TABLES {
        assert_eq!(db.records().count(table).await.unwrap(), 50);
        let row = db.records().get(table, "C0").await.unwrap().unwrap();
        assert_eq!(row.data["Description"], format!("{table} r2"));
    }

    db.close().await;
}

#[derive(serde::Deserialize)]
struct TablesDoc {
    tables: Vec<strata_core::TableEntry>,
}
