//! # Local Changes
//!
//! Journal entries for local edits waiting to be pushed, plus the field-level
//! patch helpers used on both sides of the wire.
//!
//! ## Change Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  TYPE        WIRE   obj (post)   mods (patch)   old_obj (pre)           │
//! │  ──────      ────   ──────────   ────────────   ─────────────           │
//! │  Create       1        ✓              -               -                 │
//! │  Update       2        ✓              ✓               ✓                 │
//! │  Delete       3        -              -               ✓                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::TableName;

// =============================================================================
// Change Type
// =============================================================================

/// Kind of a captured change. Travels as the integers 1, 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChangeType {
    Create = 1,
    Update = 2,
    Delete = 3,
}

impl TryFrom<u8> for ChangeType {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChangeType::Create),
            2 => Ok(ChangeType::Update),
            3 => Ok(ChangeType::Delete),
            other => Err(CoreError::InvalidChangeType(other)),
        }
    }
}

impl From<ChangeType> for u8 {
    fn from(value: ChangeType) -> Self {
        value as u8
    }
}

impl ChangeType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }
}

// =============================================================================
// Local Change
// =============================================================================

/// A pending change recorded in the same transaction as a local write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalChange {
    /// Journal id, monotonic in commit order.
    pub id: i64,
    pub change_type: ChangeType,
    pub table: TableName,
    pub key: String,
    /// Post-image (Create/Update).
    pub obj: Option<Value>,
    /// Changed top-level fields (Update).
    pub mods: Option<Value>,
    /// Pre-image (Update/Delete).
    pub old_obj: Option<Value>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Patch Helpers
// =============================================================================

/// Computes the top-level fields of `new` that differ from `old`.
///
/// Fields present in `old` but absent from `new` map to `null`. Non-object
/// inputs produce an empty patch.
pub fn compute_mods(old: &Value, new: &Value) -> Map<String, Value> {
    let mut mods = Map::new();

    let (Some(old), Some(new)) = (old.as_object(), new.as_object()) else {
        return mods;
    };

    for (field, value) in new {
        if old.get(field) != Some(value) {
            mods.insert(field.clone(), value.clone());
        }
    }

    for field in old.keys() {
        if !new.contains_key(field) {
            mods.insert(field.clone(), Value::Null);
        }
    }

    mods
}

/// Applies a patch to an object in place.
///
/// Keys may be dotted paths (`"Location.Easting"`); missing intermediate
/// objects are created. Non-object targets are replaced by an empty object
/// first.
pub fn apply_mods(target: &mut Value, mods: &Map<String, Value>) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    for (path, value) in mods {
        let mut cursor = &mut *target;
        let mut parts = path.split('.').peekable();

        while let Some(part) = parts.next() {
            if !cursor.is_object() {
                *cursor = Value::Object(Map::new());
            }
            let Some(map) = cursor.as_object_mut() else {
                break;
            };

            if parts.peek().is_none() {
                map.insert(part.to_string(), value.clone());
                break;
            }

            cursor = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_type_wire_values() {
        assert_eq!(serde_json::to_string(&ChangeType::Create).unwrap(), "1");
        assert_eq!(serde_json::to_string(&ChangeType::Delete).unwrap(), "3");

        let parsed: ChangeType = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, ChangeType::Update);

        assert!(serde_json::from_str::<ChangeType>("4").is_err());
        assert!(matches!(
            ChangeType::try_from(0),
            Err(CoreError::InvalidChangeType(0))
        ));
    }

    #[test]
    fn test_compute_mods() {
        let old = json!({ "Code": "DR", "Description": "Drilled", "Active": true });
        let new = json!({ "Code": "DR", "Description": "Drilled out", "Sort": 3 });

        let mods = compute_mods(&old, &new);
        assert_eq!(mods.len(), 3);
        assert_eq!(mods["Description"], json!("Drilled out"));
        assert_eq!(mods["Sort"], json!(3));
        assert_eq!(mods["Active"], Value::Null);
        assert!(!mods.contains_key("Code"));
    }

    #[test]
    fn test_compute_mods_identical() {
        let obj = json!({ "Code": "DR" });
        assert!(compute_mods(&obj, &obj).is_empty());
        assert!(compute_mods(&json!(1), &obj).is_empty());
    }

    #[test]
    fn test_apply_mods_flat_and_dotted() {
        let mut target = json!({ "Code": "DR", "Location": { "Easting": 1 } });
        let mods = json!({
            "Description": "Drilled",
            "Location.Northing": 2,
            "Survey.Method": "GPS"
        });

        apply_mods(&mut target, mods.as_object().unwrap());

        assert_eq!(
            target,
            json!({
                "Code": "DR",
                "Description": "Drilled",
                "Location": { "Easting": 1, "Northing": 2 },
                "Survey": { "Method": "GPS" }
            })
        );
    }

    #[test]
    fn test_mods_round_trip() {
        let old = json!({ "a": 1, "b": 2 });
        let new = json!({ "a": 1, "b": 3, "c": 4 });
        let mut patched = old.clone();
        apply_mods(&mut patched, &compute_mods(&old, &new));
        assert_eq!(patched, new);
    }
}
