//! # Option Mapping Policy
//!
//! Turns raw lookup rows into `(value, label)` pairs for pick lists.
//!
//! Each table may carry an [`OptionDescriptor`] in the registry; tables
//! without one use [`OptionDescriptor::for_key`], which takes the key field
//! as the value and `Description` as the label.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label field used when a table has no descriptor.
pub const DEFAULT_LABEL_FIELD: &str = "Description";

/// How to turn a table's rows into options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    /// Field providing the option value.
    pub value_field: String,

    /// Fields joined to form the label, in order.
    #[serde(default = "default_label_fields")]
    pub label_fields: Vec<String>,

    #[serde(default = "default_label_separator")]
    pub label_separator: String,

    /// Sort key; the label when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,

    /// Fields callers may filter on (e.g. a parent code).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_fields: Vec<String>,
}

fn default_label_fields() -> Vec<String> {
    vec![DEFAULT_LABEL_FIELD.to_string()]
}

fn default_label_separator() -> String {
    " - ".to_string()
}

impl OptionDescriptor {
    /// Default descriptor for a table keyed by `key_field`.
    pub fn for_key(key_field: &str) -> Self {
        OptionDescriptor {
            value_field: key_field.to_string(),
            label_fields: default_label_fields(),
            label_separator: default_label_separator(),
            sort_field: None,
            filter_fields: Vec::new(),
        }
    }
}

/// One display option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Maps rows to options.
///
/// Rows are kept when every filter entry naming one of the descriptor's
/// `filter_fields` matches; other filter entries are ignored. Rows without a
/// value are dropped. A row whose label fields are all empty is labelled with
/// its value.
///
/// ## Example
/// ```rust
/// use std::collections::BTreeMap;
/// use serde_json::json;
/// use strata_core::options::{to_options, OptionDescriptor};
///
/// let rows = vec![
///     json!({ "Code": "RC", "Description": "Reverse circulation" }),
///     json!({ "Code": "DD", "Description": "Diamond" }),
/// ];
/// let options = to_options(&rows, &OptionDescriptor::for_key("Code"), &BTreeMap::new());
///
/// assert_eq!(options[0].value, "DD");
/// assert_eq!(options[1].label, "Reverse circulation");
/// ```
pub fn to_options(
    rows: &[Value],
    descriptor: &OptionDescriptor,
    filter: &BTreeMap<String, Value>,
) -> Vec<SelectOption> {
    let active_filters: Vec<(&String, &Value)> = filter
        .iter()
        .filter(|(field, _)| descriptor.filter_fields.contains(field))
        .collect();

    let mut keyed: Vec<(Option<Value>, SelectOption)> = rows
        .iter()
        .filter(|row| {
            active_filters
                .iter()
                .all(|(field, wanted)| loosely_equal(row.get(field.as_str()), wanted))
        })
        .filter_map(|row| {
            let value = row.get(&descriptor.value_field).and_then(display_text)?;

            let parts: Vec<String> = descriptor
                .label_fields
                .iter()
                .filter_map(|field| row.get(field).and_then(display_text))
                .collect();
            let label = if parts.is_empty() {
                value.clone()
            } else {
                parts.join(&descriptor.label_separator)
            };

            let sort_key = descriptor
                .sort_field
                .as_ref()
                .and_then(|field| row.get(field).cloned());

            Some((sort_key, SelectOption { value, label }))
        })
        .collect();

    match descriptor.sort_field {
        Some(_) => keyed.sort_by(|(a, _), (b, _)| compare_values(a.as_ref(), b.as_ref())),
        None => keyed.sort_by(|(_, a), (_, b)| a.label.cmp(&b.label)),
    }

    keyed.into_iter().map(|(_, option)| option).collect()
}

fn display_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// Filter values arrive from UI state, so `1` and `"1"` must match.
fn loosely_equal(actual: Option<&Value>, wanted: &Value) -> bool {
    match actual {
        Some(actual) if actual == wanted => true,
        Some(actual) => display_text(actual).is_some() && display_text(actual) == display_text(wanted),
        None => wanted.is_null(),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(x), Some(y)) => display_text(x).cmp(&display_text(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
