//! # Repository Module
//!
//! Pool-backed read access to the local store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Reads vs Writes                                      │
//! │                                                                         │
//! │  db.records().latest_version("Lookup_HoleStatus")   ← pool, read-only  │
//! │  db.changes().pending(100)                          ← pool              │
//! │  db.sync_state().last_revision()                    ← pool              │
//! │                                                                         │
//! │  db.begin(WriteOrigin::Local)  ─► StoreTransaction  ← every row write   │
//! │       upsert / patch / delete         (journal capture decided by       │
//! │       commit ─► CommitEvent           the transaction's origin)         │
//! │                                                                         │
//! │  Statements shared by both paths live next to each repository as       │
//! │  executor-generic functions.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`RecordRepository`](records::RecordRepository) - Row reads and version scans
//! - [`ChangeRepository`](changes::ChangeRepository) - Pending change journal
//! - [`StateRepository`](state::StateRepository) - Revision, context, timestamps

pub mod changes;
pub mod records;
pub mod state;
