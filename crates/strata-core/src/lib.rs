//! # strata-core: Pure Sync Domain Types for Strata
//!
//! Types and pure functions shared by the local store and the sync engine.
//! Nothing in this crate performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Strata Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/strata-agent (CLI)                         │   │
//! │  │        run ──► pull ──► push ──► status                         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              strata-sync (cursors, pull, push, agent)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              strata-db (rows, change journal, state)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ strata-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   token   │  │   types   │  │  tables   │  │  options  │  │   │
//! │  │   │ base64 ⇄  │  │ Row       │  │ registry  │  │ value /   │  │   │
//! │  │   │ 8 bytes   │  │ Cursor    │  │ (TOML)    │  │ label     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`token`] - Version token codec (wire base64 ⇄ local bytes)
//! - [`types`] - Rows, cursors, write origins, commit events
//! - [`change`] - Local change journal entries and patch helpers
//! - [`tables`] - Data-driven table registry
//! - [`options`] - Row to `(value, label)` option mapping
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use strata_core::{TableRegistry, VersionToken};
//!
//! let registry = TableRegistry::builtin().unwrap();
//! assert!(registry.contains("Lookup_HoleStatus"));
//!
//! // A never-synced table asks for everything
//! assert_eq!(VersionToken::EMPTY.encode(), "");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod change;
pub mod error;
pub mod options;
pub mod tables;
pub mod token;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use change::{apply_mods, compute_mods, ChangeType, LocalChange};
pub use error::{CoreError, CoreResult, TokenError};
pub use options::{to_options, OptionDescriptor, SelectOption};
pub use tables::{TableEntry, TableRegistry, TableSpec};
pub use token::VersionToken;
pub use types::*;
