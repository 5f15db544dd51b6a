//! # Table Registry
//!
//! The fixed set of synchronizable tables, loaded from data rather than code.
//!
//! ## Registry Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Table Registry Sources                             │
//! │                                                                         │
//! │  1. tables.toml (embedded at compile time)                             │
//! │     [defaults]  key_field = "Code", version_field = "rv"               │
//! │     [[tables]]  name = "Lookup_HoleStatus"                             │
//! │                                                                         │
//! │  2. sync.toml [[tables]] entries (runtime, optional)                   │
//! │     • new name      → appended                                         │
//! │     • existing name → key/version fields overridden                    │
//! │                                                                         │
//! │  Adding a table is a data change. No new code path is needed.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::options::OptionDescriptor;
use crate::types::TableName;

/// Built-in registry document.
const BUILTIN_TABLES: &str = include_str!("../tables.toml");

// =============================================================================
// Table Spec
// =============================================================================

/// Resolved description of one synchronizable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table identifier, as used on the wire.
    pub name: TableName,

    /// Field of each row object holding the primary key.
    pub key_field: String,

    /// Field of each row object holding the base64 version token.
    pub version_field: String,

    /// Option-list policy override for this table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<OptionDescriptor>,
}

/// One `[[tables]]` entry as written in a registry document.
///
/// Missing fields are filled from the document's `[defaults]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<OptionDescriptor>,
}

/// Field defaults applied to entries that omit them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefaults {
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_version_field")]
    pub version_field: String,
}

fn default_key_field() -> String {
    "id".to_string()
}

fn default_version_field() -> String {
    "rv".to_string()
}

impl Default for TableDefaults {
    fn default() -> Self {
        TableDefaults {
            key_field: default_key_field(),
            version_field: default_version_field(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    defaults: TableDefaults,
    #[serde(default)]
    tables: Vec<TableEntry>,
}

// =============================================================================
// Table Registry
// =============================================================================

/// Ordered, name-indexed set of [`TableSpec`]s.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    defaults: TableDefaults,
    tables: Vec<TableSpec>,
    index: HashMap<String, usize>,
}

impl TableRegistry {
    /// Loads the registry embedded in this crate.
    pub fn builtin() -> CoreResult<Self> {
        Self::from_toml_str(BUILTIN_TABLES)
    }

    /// Parses a registry document.
    ///
    /// ## Example
    /// ```rust
    /// use strata_core::tables::TableRegistry;
    ///
    /// let registry = TableRegistry::from_toml_str(r#"
    ///     [defaults]
    ///     key_field = "Code"
    ///
    ///     [[tables]]
    ///     name = "Lookup_HoleStatus"
    ///
    ///     [[tables]]
    ///     name = "Collar"
    ///     key_field = "CollarId"
    /// "#).unwrap();
    ///
    /// assert_eq!(registry.get("Lookup_HoleStatus").unwrap().key_field, "Code");
    /// assert_eq!(registry.get("Collar").unwrap().key_field, "CollarId");
    /// ```
    pub fn from_toml_str(document: &str) -> CoreResult<Self> {
        let doc: RegistryDocument =
            toml::from_str(document).map_err(|e| CoreError::InvalidRegistry(e.to_string()))?;

        let mut registry = TableRegistry {
            defaults: doc.defaults,
            tables: Vec::with_capacity(doc.tables.len()),
            index: HashMap::new(),
        };

        for entry in doc.tables {
            if registry.index.contains_key(&entry.name) {
                return Err(CoreError::DuplicateTable(entry.name));
            }
            registry.push(entry)?;
        }

        Ok(registry)
    }

    /// Builds a registry from already-resolved specs (uses `id`/`rv` defaults).
    pub fn from_specs(specs: Vec<TableSpec>) -> CoreResult<Self> {
        let mut registry = TableRegistry::default();
        for spec in specs {
            let name = spec.name.as_str().to_string();
            if registry.index.contains_key(&name) {
                return Err(CoreError::DuplicateTable(name));
            }
            validate_spec(&spec)?;
            registry.index.insert(name, registry.tables.len());
            registry.tables.push(spec);
        }
        Ok(registry)
    }

    /// Applies runtime entries: unknown names are appended, known names are
    /// overridden field by field.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = TableEntry>) -> CoreResult<()> {
        for entry in entries {
            match self.index.get(&entry.name).copied() {
                Some(pos) => {
                    let mut spec = self.tables[pos].clone();
                    if let Some(key_field) = entry.key_field {
                        spec.key_field = key_field;
                    }
                    if let Some(version_field) = entry.version_field {
                        spec.version_field = version_field;
                    }
                    if entry.options.is_some() {
                        spec.options = entry.options;
                    }
                    validate_spec(&spec)?;
                    self.tables[pos] = spec;
                }
                None => self.push(entry)?,
            }
        }
        Ok(())
    }

    fn push(&mut self, entry: TableEntry) -> CoreResult<()> {
        let spec = TableSpec {
            name: TableName::new(entry.name.clone()),
            key_field: entry
                .key_field
                .unwrap_or_else(|| self.defaults.key_field.clone()),
            version_field: entry
                .version_field
                .unwrap_or_else(|| self.defaults.version_field.clone()),
            options: entry.options,
        };
        validate_spec(&spec)?;

        self.index.insert(entry.name, self.tables.len());
        self.tables.push(spec);
        Ok(())
    }

    /// Looks up a table by name.
    pub fn get(&self, name: &str) -> Option<&TableSpec> {
        self.index.get(name).map(|&pos| &self.tables[pos])
    }

    /// Looks up a table by name, failing for unknown tables.
    pub fn require(&self, name: &str) -> CoreResult<&TableSpec> {
        self.get(name)
            .ok_or_else(|| CoreError::UnknownTable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates tables in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.iter()
    }

    /// Returns all table names in registry order.
    pub fn names(&self) -> Vec<TableName> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns the option-list policy for a table: its override, or the
    /// default descriptor derived from its key field.
    pub fn option_descriptor(&self, name: &str) -> Option<OptionDescriptor> {
        self.get(name).map(|spec| {
            spec.options
                .clone()
                .unwrap_or_else(|| OptionDescriptor::for_key(&spec.key_field))
        })
    }
}

fn validate_spec(spec: &TableSpec) -> CoreResult<()> {
    if spec.name.as_str().trim().is_empty() {
        return Err(CoreError::InvalidRegistry("table name is empty".into()));
    }
    if spec.key_field.trim().is_empty() || spec.version_field.trim().is_empty() {
        return Err(CoreError::InvalidRegistry(format!(
            "table {} has an empty key or version field",
            spec.name
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_loads() {
        let registry = TableRegistry::builtin().unwrap();
        assert!(!registry.is_empty());

        let status = registry.get("Lookup_HoleStatus").unwrap();
        assert_eq!(status.key_field, "Code");
        assert_eq!(status.version_field, "rv");

        let collar = registry.get("Collar").unwrap();
        assert_eq!(collar.key_field, "CollarId");
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = TableRegistry::from_toml_str(
            r#"
            [[tables]]
            name = "A"
            [[tables]]
            name = "A"
            "#,
        );
        assert!(matches!(result, Err(CoreError::DuplicateTable(name)) if name == "A"));
    }

    #[test]
    fn test_defaults_without_section() {
        let registry = TableRegistry::from_toml_str("[[tables]]\nname = \"A\"").unwrap();
        let spec = registry.get("A").unwrap();
        assert_eq!(spec.key_field, "id");
        assert_eq!(spec.version_field, "rv");
    }

    #[test]
    fn test_extend_appends_and_overrides() {
        let mut registry = TableRegistry::from_toml_str(
            r#"
            [[tables]]
            name = "A"
            "#,
        )
        .unwrap();

        registry
            .extend(vec![
                TableEntry {
                    name: "A".into(),
                    key_field: Some("Code".into()),
                    version_field: None,
                    options: None,
                },
                TableEntry {
                    name: "B".into(),
                    key_field: None,
                    version_field: Some("RowVersion".into()),
                    options: None,
                },
            ])
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("A").unwrap().key_field, "Code");
        assert_eq!(registry.get("B").unwrap().version_field, "RowVersion");
        assert_eq!(
            registry.names(),
            vec![TableName::from("A"), TableName::from("B")]
        );
    }

    #[test]
    fn test_empty_field_rejected() {
        let result = TableRegistry::from_toml_str(
            r#"
            [[tables]]
            name = "A"
            key_field = ""
            "#,
        );
        assert!(matches!(result, Err(CoreError::InvalidRegistry(_))));
    }

    #[test]
    fn test_require_unknown() {
        let registry = TableRegistry::builtin().unwrap();
        assert!(matches!(
            registry.require("Nope"),
            Err(CoreError::UnknownTable(_))
        ));
    }
}
