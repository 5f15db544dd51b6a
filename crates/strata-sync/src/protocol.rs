//! # Sync Protocol Messages
//!
//! Request and response bodies for the two sync endpoints.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Protocol Messages                             │
//! │                                                                         │
//! │  PULL (incremental download, per-table cursors)                        │
//! │  ──────────────────────────────────────────────                        │
//! │  CLIENT ───► PullRequest  { tables: [{ tableName, rv }] }              │
//! │  SERVER ◄─── PullResponse { results: [{ tableName, count,              │
//! │                                         records, error? }],            │
//! │                             totalRecords, timestamp }                  │
//! │                                                                         │
//! │  PUSH (journal upload + server changes since lastRevision)             │
//! │  ──────────────────────────────────────────────────────────            │
//! │  CLIENT ───► PushRequest  { clientChanges, lastRevision,               │
//! │                             syncContext }                               │
//! │  SERVER ◄─── PushResponse { changes, currentRevision, partial,         │
//! │                             conflicts?, message? }                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! JSON with camelCase field names. `rv: ""` asks for the whole table.
//! Change kinds travel as integers (1 = create, 2 = update, 3 = delete).
//!
//! Response decoding is lenient where servers are known to vary: keys and
//! revisions may be strings or numbers, and a malformed entry in
//! `changes` is dropped with a warning instead of failing the push.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use strata_core::{ChangeType, LocalChange, SyncContext, SyncCursor};

// =============================================================================
// Pull
// =============================================================================

/// One `(tableName, rv)` pair of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCursor {
    pub table_name: String,
    /// Base64 version token; empty requests every record.
    #[serde(default)]
    pub rv: String,
}

impl From<&SyncCursor> for TableCursor {
    fn from(cursor: &SyncCursor) -> Self {
        TableCursor {
            table_name: cursor.table.to_string(),
            rv: cursor.encoded(),
        }
    }
}

/// Batched pull request: one cursor per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub tables: Vec<TableCursor>,
}

impl PullRequest {
    pub fn from_cursors(cursors: &[SyncCursor]) -> Self {
        PullRequest {
            tables: cursors.iter().map(TableCursor::from).collect(),
        }
    }
}

/// Rows for one table, or the error the server hit producing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResult {
    pub table_name: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub results: Vec<TableResult>,
    #[serde(default)]
    pub total_records: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

// =============================================================================
// Push
// =============================================================================

/// A change on the wire, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub table: String,
    #[serde(deserialize_with = "lenient_key")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mods: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_obj: Option<Value>,
}

impl From<&LocalChange> for ChangeMessage {
    fn from(change: &LocalChange) -> Self {
        ChangeMessage {
            change_type: change.change_type,
            table: change.table.to_string(),
            key: change.key.clone(),
            obj: change.obj.clone(),
            mods: change.mods.as_ref().and_then(Value::as_object).cloned(),
            old_obj: change.old_obj.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub client_changes: Vec<ChangeMessage>,
    /// `null` on a device that never completed a push.
    pub last_revision: Option<String>,
    pub sync_context: SyncContext,
}

/// Client and server disagree about one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictMessage {
    pub table: String,
    #[serde(deserialize_with = "lenient_key")]
    pub key: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub client_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub server_version: Option<String>,
    #[serde(default)]
    pub reason: String,
    /// Authoritative row; absent when the server deleted it or chose not
    /// to send it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Server changes since `lastRevision`, kept raw so one bad entry
    /// doesn't fail the batch. See [`PushResponse::server_changes`].
    #[serde(default)]
    pub changes: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub current_revision: Option<String>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub conflicts: Vec<ConflictMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PushResponse {
    /// Decodes `changes`, dropping entries that are not valid changes.
    pub fn server_changes(&self) -> Vec<ChangeMessage> {
        self.changes
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| match ChangeMessage::deserialize(raw) {
                Ok(change) => Some(change),
                Err(e) => {
                    warn!(index, error = %e, "Dropping malformed server change");
                    None
                }
            })
            .collect()
    }
}

// =============================================================================
// Lenient Field Decoding
// =============================================================================

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_key<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number key, got {}",
            other
        ))),
    }
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(scalar_to_string))
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::VersionToken;

    #[test]
    fn test_pull_request_wire_shape() {
        let request = PullRequest::from_cursors(&[
            SyncCursor::new("Lookup_HoleStatus", VersionToken::EMPTY),
            SyncCursor::new("Collar", VersionToken::from_u64(2001)),
        ]);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "tables": [
                    { "tableName": "Lookup_HoleStatus", "rv": "" },
                    { "tableName": "Collar", "rv": "AAAAAAAAB9E=" }
                ]
            })
        );
    }

    #[test]
    fn test_pull_response_with_table_error() {
        let response: PullResponse = serde_json::from_value(json!({
            "results": [
                { "tableName": "A", "count": 0, "records": [], "error": "timeout" },
                { "tableName": "B", "count": 1, "records": [{ "Code": "X" }] }
            ],
            "totalRecords": 1,
            "timestamp": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].error.as_deref(), Some("timeout"));
        assert!(response.results[1].error.is_none());
        assert!(response.timestamp.is_some());
    }

    #[test]
    fn test_push_request_wire_shape() {
        let mut mods = Map::new();
        mods.insert("Depth".into(), json!(12.5));

        let request = PushRequest {
            client_changes: vec![ChangeMessage {
                change_type: ChangeType::Update,
                table: "Collar".into(),
                key: "K1".into(),
                obj: Some(json!({ "CollarId": "K1", "Depth": 12.5 })),
                mods: Some(mods),
                old_obj: Some(json!({ "CollarId": "K1", "Depth": 10.0 })),
            }],
            last_revision: None,
            sync_context: SyncContext::default(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["clientChanges"][0]["type"], json!(2));
        assert_eq!(json["clientChanges"][0]["oldObj"]["Depth"], json!(10.0));
        assert_eq!(json["lastRevision"], Value::Null);
        assert_eq!(json["syncContext"]["selectedProgramIds"], json!([]));
    }

    #[test]
    fn test_push_response_is_lenient() {
        let response: PushResponse = serde_json::from_value(json!({
            "changes": [
                { "type": 1, "table": "Collar", "key": 42, "obj": { "CollarId": 42 } },
                { "type": 9, "table": "Collar", "key": "bad" },
                { "table": "Collar" }
            ],
            "currentRevision": 101,
            "partial": false,
            "conflicts": null
        }))
        .unwrap();

        assert_eq!(response.current_revision.as_deref(), Some("101"));
        assert!(response.conflicts.is_empty());

        let changes = response.server_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, "42");
        assert_eq!(changes[0].change_type, ChangeType::Create);
    }

    #[test]
    fn test_conflict_decoding() {
        let response: PushResponse = serde_json::from_value(json!({
            "changes": [],
            "currentRevision": "100",
            "conflicts": [{
                "table": "Collar",
                "key": "K1",
                "clientVersion": "AAAAAAAAB9E=",
                "serverVersion": "AAAAAAAAB9I=",
                "reason": "Row modified on server",
                "serverData": { "CollarId": "K1", "Depth": 30 }
            }]
        }))
        .unwrap();

        assert_eq!(response.conflicts.len(), 1);
        let conflict = &response.conflicts[0];
        assert_eq!(conflict.key, "K1");
        assert!(conflict.server_data.is_some());
        assert!(!response.partial);
    }
}
