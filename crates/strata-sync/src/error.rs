//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidMessage         │ │
//! │  │  MissingDeviceId│  │  Timeout        │  │  SerializationFailed    │ │
//! │  │  InvalidUrl     │  │  HttpStatus     │  │  DeserializationFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │   Table-level   │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │ TableSyncFailed │  │  ChannelError           │ │
//! │  │  Registry       │  │ UnknownTable    │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## How Each Category Is Handled
//! - Transport: cycle abandoned, journal untouched, retried with backoff
//! - Table-level: logged, reported per table, other tables unaffected
//! - Version token decode problems never surface; they become the sentinel
//! - Conflicts are protocol outcomes, not errors

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required for sync).
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Invalid server URL.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Table registry could not be built.
    #[error("Invalid table registry: {0}")]
    Registry(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach the server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timeout.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    /// Server answered with a non-success status.
    #[error("Server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Request could not be sent or its body not read.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Invalid message received.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize message.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Local store operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Table-level Errors
    // =========================================================================
    /// One table failed to sync; siblings are unaffected.
    #[error("Sync of table {table} failed: {reason}")]
    TableSyncFailed { table: String, reason: String },

    /// Table is not in the registry.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<strata_db::DbError> for SyncError {
    fn from(err: strata_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<strata_core::CoreError> for SyncError {
    fn from(err: strata_core::CoreError) -> Self {
        match err {
            strata_core::CoreError::UnknownTable(name) => SyncError::UnknownTable(name),
            other => SyncError::Registry(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

/// Convert reqwest errors to SyncError.
///
/// ## Error Mapping
/// ```text
/// timeout         → SyncError::Timeout (seconds unknown here, see transport)
/// connect         → SyncError::ConnectionFailed
/// status          → SyncError::HttpStatus
/// decode          → SyncError::DeserializationFailed
/// other           → SyncError::RequestFailed
/// ```
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(0)
        } else if err.is_connect() {
            SyncError::ConnectionFailed(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::HttpStatus {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            SyncError::DeserializationFailed(err.to_string())
        } else {
            SyncError::RequestFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// ## Retryable Errors
    /// - Connection failures (network issues)
    /// - Timeouts
    /// - Server-side 5xx, 408 and 429 responses
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Client-side 4xx (bad token, bad request)
    /// - Protocol errors
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) | SyncError::RequestFailed(_) => true,
            SyncError::HttpStatus { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::Registry(_)
        )
    }

    /// Returns true if the error came from the transport, i.e. the server
    /// was not reached or did not answer successfully.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout(_)
                | SyncError::HttpStatus { .. }
                | SyncError::RequestFailed(_)
        )
    }

    /// Returns true if this error indicates a protocol mismatch.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidMessage(_)
                | SyncError::SerializationFailed(_)
                | SyncError::DeserializationFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::HttpStatus { status: 503, body: String::new() }.is_retryable());
        assert!(SyncError::HttpStatus { status: 429, body: String::new() }.is_retryable());

        assert!(!SyncError::HttpStatus { status: 401, body: String::new() }.is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
        assert!(!SyncError::DeserializationFailed("x".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::TableSyncFailed {
            table: "Lookup_HoleStatus".into(),
            reason: "bad payload".into(),
        };
        assert!(err.to_string().contains("Lookup_HoleStatus"));
        assert!(err.to_string().contains("bad payload"));
    }

    #[test]
    fn test_core_error_mapping() {
        let err: SyncError = strata_core::CoreError::UnknownTable("X".into()).into();
        assert!(matches!(err, SyncError::UnknownTable(name) if name == "X"));
        assert!(SyncError::Registry("dup".into()).is_config_error());
    }
}
