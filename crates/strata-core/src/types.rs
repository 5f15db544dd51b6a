//! # Domain Types
//!
//! Rows, cursors and commit metadata shared by the store and the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Row        │   │   SyncCursor    │   │  CommitEvent    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  table          │   │  table          │   │  origin         │       │
//! │  │  key            │   │  version        │   │  tables         │       │
//! │  │  version        │   └─────────────────┘   └─────────────────┘       │
//! │  │  data (JSON)    │                                                   │
//! │  └─────────────────┘   ┌─────────────────┐   ┌─────────────────┐       │
//! │                        │  WriteOrigin    │   │  SyncContext    │       │
//! │                        │  ─────────────  │   │  ─────────────  │       │
//! │                        │  Local          │   │  program ids    │       │
//! │                        │  Sync           │   │  collar ids     │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Row Identity
//! A row is addressed by `(table, key)`. The key is the string form of the
//! table's key field, so a numeric id `7` and a string id `"7"` are the
//! same row.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::tables::TableSpec;
use crate::token::VersionToken;

// =============================================================================
// Table Name
// =============================================================================

/// Identifier of one synchronizable table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        TableName(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        TableName(name.to_string())
    }
}

impl From<String> for TableName {
    fn from(name: String) -> Self {
        TableName(name)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Row
// =============================================================================

/// One stored row: key, version and the opaque JSON object of attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub table: TableName,
    pub key: String,
    pub version: VersionToken,
    pub data: Value,
}

impl Row {
    pub fn new(table: impl Into<TableName>, key: impl Into<String>, version: VersionToken, data: Value) -> Self {
        Row {
            table: table.into(),
            key: key.into(),
            version,
            data,
        }
    }

    /// Builds a row from a raw object using the table's key and version fields.
    ///
    /// ## Errors
    /// * [`CoreError::NotAnObject`] if `obj` is not a JSON object
    /// * [`CoreError::MissingKey`] if the key field is absent or not a scalar
    ///
    /// A missing or malformed version field yields the sentinel token.
    pub fn from_object(spec: &TableSpec, obj: Value) -> CoreResult<Self> {
        let map = obj.as_object().ok_or_else(|| CoreError::NotAnObject {
            table: spec.name.to_string(),
        })?;

        let key = map
            .get(&spec.key_field)
            .and_then(key_to_string)
            .ok_or_else(|| CoreError::MissingKey {
                table: spec.name.to_string(),
                field: spec.key_field.clone(),
            })?;

        let version = VersionToken::decode(map.get(&spec.version_field).and_then(Value::as_str));

        Ok(Row {
            table: spec.name.clone(),
            key,
            version,
            data: obj,
        })
    }

    /// Returns the row as a wire object, with the version field set from
    /// [`Row::version`] when it is not the sentinel.
    pub fn to_object(&self, spec: &TableSpec) -> Value {
        let mut obj = self.data.clone();
        if !self.version.is_empty() {
            if let Some(map) = obj.as_object_mut() {
                map.insert(spec.version_field.clone(), Value::String(self.version.encode()));
            }
        }
        obj
    }
}

/// Converts a JSON key value into its string form.
///
/// Strings (non-empty) and numbers are keys; everything else is not.
pub fn key_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Sync Cursor
// =============================================================================

/// Highest version token held locally for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    pub table: TableName,
    pub version: VersionToken,
}

impl SyncCursor {
    pub fn new(table: impl Into<TableName>, version: VersionToken) -> Self {
        SyncCursor {
            table: table.into(),
            version,
        }
    }

    /// Wire form of the cursor token (`""` requests the full table).
    pub fn encoded(&self) -> String {
        self.version.encode()
    }
}

// =============================================================================
// Sync Context
// =============================================================================

/// Scoping context sent with every push: which subset of the data this
/// device keeps synchronized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncContext {
    #[serde(default)]
    pub selected_program_ids: Vec<String>,
    #[serde(default)]
    pub selected_collar_ids: Vec<String>,
}

impl SyncContext {
    pub fn is_empty(&self) -> bool {
        self.selected_program_ids.is_empty() && self.selected_collar_ids.is_empty()
    }
}

// =============================================================================
// Write Origin / Commit Event
// =============================================================================

/// Who initiated a store transaction.
///
/// Local writes are journaled for push; sync writes are not. The origin is
/// fixed when the transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrigin {
    /// Application edit: captured in the change journal.
    Local,
    /// Pull merge or push reconcile: never captured.
    Sync,
}

impl WriteOrigin {
    #[inline]
    pub const fn is_local(&self) -> bool {
        matches!(self, WriteOrigin::Local)
    }
}

/// Broadcast to read-side subscribers after every successful commit,
/// whatever its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    pub origin: WriteOrigin,
    pub tables: BTreeSet<TableName>,
}

impl CommitEvent {
    pub fn touches(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.as_str() == table)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> TableSpec {
        TableSpec {
            name: TableName::from("Lookup_HoleStatus"),
            key_field: "Code".into(),
            version_field: "rv".into(),
            options: None,
        }
    }

    #[test]
    fn test_row_from_object() {
        let token = VersionToken::from_u64(2001);
        let row = Row::from_object(
            &spec(),
            json!({ "Code": "DR", "Description": "Drilled", "rv": token.encode() }),
        )
        .unwrap();

        assert_eq!(row.key, "DR");
        assert_eq!(row.version, token);
        assert_eq!(row.table.as_str(), "Lookup_HoleStatus");
    }

    #[test]
    fn test_row_numeric_key_and_bad_version() {
        let row = Row::from_object(&spec(), json!({ "Code": 7, "rv": "??" })).unwrap();
        assert_eq!(row.key, "7");
        assert!(row.version.is_empty());
    }

    #[test]
    fn test_row_missing_key() {
        let err = Row::from_object(&spec(), json!({ "Description": "x" })).unwrap_err();
        assert!(matches!(err, CoreError::MissingKey { .. }));

        let err = Row::from_object(&spec(), json!({ "Code": null })).unwrap_err();
        assert!(matches!(err, CoreError::MissingKey { .. }));

        let err = Row::from_object(&spec(), json!([1, 2])).unwrap_err();
        assert!(matches!(err, CoreError::NotAnObject { .. }));
    }

    #[test]
    fn test_to_object_sets_version() {
        let token = VersionToken::from_u64(9);
        let row = Row::new("Lookup_HoleStatus", "DR", token, json!({ "Code": "DR" }));
        let obj = row.to_object(&spec());
        assert_eq!(obj["rv"], json!(token.encode()));

        let row = Row::new("Lookup_HoleStatus", "DR", VersionToken::EMPTY, json!({ "Code": "DR" }));
        assert!(row.to_object(&spec()).get("rv").is_none());
    }

    #[test]
    fn test_sync_context_wire_names() {
        let ctx = SyncContext {
            selected_program_ids: vec!["P1".into()],
            selected_collar_ids: vec![],
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json, json!({ "selectedProgramIds": ["P1"], "selectedCollarIds": [] }));

        let parsed: SyncContext = serde_json::from_value(json!({})).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_commit_event_touches() {
        let event = CommitEvent {
            origin: WriteOrigin::Sync,
            tables: [TableName::from("A")].into_iter().collect(),
        };
        assert!(event.touches("A"));
        assert!(!event.touches("B"));
        assert!(!event.origin.is_local());
    }
}
