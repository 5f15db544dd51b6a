//! # strata-sync: Sync Engine for Strata
//!
//! Keeps the local store consistent with the authoritative server:
//! incremental pull by per-table version cursor, and push of the local
//! change journal with server-wins conflict reconciliation.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Agent Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgent (Main Orchestrator)               │  │
//! │  │  interval timer + manual triggers, retry with backoff, status    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┴─────────────────────┐                  │
//! │         ▼                                           ▼                   │
//! │  ┌────────────────────────┐              ┌────────────────────────┐    │
//! │  │ PullCoordinator        │              │ PushCoordinator        │    │
//! │  │                        │              │                        │    │
//! │  │ CursorTracker ─► one   │              │ journal ─► one call ─► │    │
//! │  │ call ─► per-table      │              │ reconcile in one Sync  │    │
//! │  │ Sync transactions      │              │ transaction            │    │
//! │  └───────────┬────────────┘              └───────────┬────────────┘    │
//! │              └──────────────┬────────────────────────┘                  │
//! │                             ▼                                           │
//! │               ┌──────────────────────────┐                              │
//! │               │ SyncRpc                  │                              │
//! │               │ HttpRpcClient / MockRpc  │                              │
//! │               └──────────────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `SyncAgent`, triggers, status and handle
//! - [`config`] - Sync configuration (device, server, sync, scope, tables)
//! - [`cursor`] - Per-table pull cursors
//! - [`error`] - Sync error types
//! - [`protocol`] - Wire messages for the pull and push endpoints
//! - [`pull`] - Pull coordinator and per-table merge
//! - [`push`] - Push coordinator and reconcile
//! - [`transport`] - `SyncRpc` trait, HTTP client, mock
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_sync::{HttpRpcClient, SyncAgent, SyncConfig, SyncTrigger};
//!
//! let config = SyncConfig::load_or_default(None);
//! let rpc = Arc::new(HttpRpcClient::new(&config.server)?);
//!
//! let handle = SyncAgent::new(config, db, rpc)?.spawn();
//! handle.trigger(SyncTrigger::Full).await?;
//!
//! let status = handle.status().await;
//! println!("Pending: {}", status.pending_changes);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod cursor;
pub mod error;
pub mod protocol;
pub mod pull;
pub mod push;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{CycleReport, NoOpEmitter, SyncAgent, SyncAgentHandle, SyncEventEmitter, SyncState, SyncStatus, SyncTrigger};
pub use config::{ScopeSettings, ServerSettings, SyncConfig, SyncMode, SyncSettings};
pub use cursor::CursorTracker;
pub use error::{SyncError, SyncResult};
pub use protocol::{ChangeMessage, ConflictMessage, PullRequest, PullResponse, PushRequest, PushResponse, TableCursor, TableResult};
pub use pull::{MergeStats, PullCoordinator, PullReport, TableOutcome};
pub use push::{PushCoordinator, ReconcileOutcome};
pub use transport::{HttpRpcClient, MockRpc, SyncRpc};
