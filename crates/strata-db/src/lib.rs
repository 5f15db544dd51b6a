//! # strata-db: Local Store for Strata
//!
//! SQLite storage for synchronized rows, the pending change journal and
//! sync bookkeeping.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Strata Data Flow                                 │
//! │                                                                         │
//! │  App edit                      Pull merge / push reconcile             │
//! │  begin(Local)                  begin(Sync)                              │
//! │       │                              │                                  │
//! │       ▼                              ▼                                  │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     strata-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │  records      │    │  (embedded)  │  │   │
//! │  │   │               │    │  changes      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│  sync_state   │    │ 001_sync_    │  │   │
//! │  │   │ CommitEvents  │    └───────────────┘    │ schema.sql   │  │   │
//! │  │   └───────┬───────┘                         └──────────────┘  │   │
//! │  │           │  StoreTransaction (store.rs)                       │   │
//! │  │           └─ origin-aware writes + journal capture             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (platform data dir)/strata.db                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, `Database` handle, commit subscriptions
//! - [`store`] - Origin-tagged write transactions
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Pool-backed reads (records, changes, sync state)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_db::{Database, DbConfig};
//! use strata_core::{Row, VersionToken, WriteOrigin};
//!
//! let db = Database::new(DbConfig::new("strata.db")).await?;
//!
//! let mut tx = db.begin(WriteOrigin::Local).await?;
//! tx.upsert(Row::new("Collar", "C1", VersionToken::EMPTY, obj)).await?;
//! tx.commit().await?;
//!
//! assert_eq!(db.changes().count_pending().await?, 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use store::{StoreTransaction, WriteOutcome};

pub use repository::changes::ChangeRepository;
pub use repository::records::RecordRepository;
pub use repository::state::StateRepository;
