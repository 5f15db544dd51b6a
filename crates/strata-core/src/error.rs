//! # Error Types
//!
//! Domain-specific error types for strata-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  strata-core errors (this file)                                        │
//! │  ├── CoreError   - Registry, row shape and change-type problems        │
//! │  └── TokenError  - Malformed version token text or bytes               │
//! │                                                                         │
//! │  strata-db errors (separate crate)                                     │
//! │  └── DbError     - Local store failures                                │
//! │                                                                         │
//! │  strata-sync errors (separate crate)                                   │
//! │  └── SyncError   - Transport, protocol and per-table failures          │
//! │                                                                         │
//! │  Flow: TokenError → (sentinel) | CoreError → DbError → SyncError       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `TokenError` almost never leaves this crate: [`crate::token::VersionToken::decode`]
//! swallows it and substitutes the sentinel token.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The table registry document could not be parsed.
    #[error("Invalid table registry: {0}")]
    InvalidRegistry(String),

    /// A table name appears twice in the registry.
    #[error("Duplicate table in registry: {0}")]
    DuplicateTable(String),

    /// A table name is not part of the registry.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// A row object lacks its primary key field (or the key is not a scalar).
    ///
    /// ## When This Occurs
    /// - Server sends a record without the table's key field
    /// - Application writes an object with a null/array/object key
    #[error("Row in {table} has no usable key field '{field}'")]
    MissingKey { table: String, field: String },

    /// A row payload is not a JSON object.
    #[error("Row in {table} is not a JSON object")]
    NotAnObject { table: String },

    /// Wire change type outside 1..=3.
    #[error("Invalid change type: {0} (expected 1, 2 or 3)")]
    InvalidChangeType(u8),

    /// Version token error (wraps TokenError).
    #[error("Version token error: {0}")]
    Token(#[from] TokenError),
}

// =============================================================================
// Token Error
// =============================================================================

/// Version token decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Text is not valid base64.
    #[error("Version token is not valid base64: {0}")]
    InvalidBase64(String),

    /// Decoded byte length is neither 0 nor the fixed token width.
    #[error("Version token must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::MissingKey {
            table: "Lookup_HoleStatus".into(),
            field: "Code".into(),
        };
        assert!(err.to_string().contains("Lookup_HoleStatus"));
        assert!(err.to_string().contains("Code"));

        let err = TokenError::InvalidLength {
            expected: 8,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Version token must be 8 bytes, got 3");
    }

    #[test]
    fn test_token_error_converts() {
        let err: CoreError = TokenError::InvalidBase64("!!".into()).into();
        assert!(matches!(err, CoreError::Token(_)));
    }
}
