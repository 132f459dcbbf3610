//! # litedit - SQLite Document Engine
//!
//! litedit is the backend of a SQLite editor. A host (an editor extension,
//! a TUI, a desktop app) opens a database file as a document, browses it,
//! edits it, and gets:
//!
//! - **Injection-safe SQL**: identifiers escaped, values bound, pragma names allow-listed
//! - **Undo/redo**: every edit recorded as a self-contained, serializable entry
//! - **Isolation**: the engine runs on its own thread or in its own process
//! - **Crash recovery**: hot-exit backups of the edit history
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       DatabaseDocument                          │
//! │        (edits, undo/redo, save, revert, hot-exit backup)        │
//! │                                                                 │
//! │   ┌──────────────────────┐     ┌─────────────────────────────┐  │
//! │   │ ModificationTracker  │     │ Arc<dyn DatabaseOperations> │  │
//! │   │ timeline/checkpoint  │     │   AuditedDatabase<...>      │  │
//! │   └──────────────────────┘     └──────────────┬──────────────┘  │
//! └───────────────────────────────────────────────┼─────────────────┘
//!                                                 │ RpcProxy::call
//!                       invoke/result envelopes   │ (30s timeout)
//!                 ┌───────────────────────────────┴───────────────┐
//!                 ▼                                               ▼
//! ┌───────────────────────────────┐   ┌───────────────────────────────────┐
//! │ WorkerDatabase                │   │ NativeDatabase                    │
//! │ engine thread, mpsc channel   │   │ litedit-worker process, stdio     │
//! └───────────────┬───────────────┘   └─────────────────┬─────────────────┘
//!                 └──────────────► RpcHandler ◄─────────┘
//!                                      │
//!                                      ▼
//!                           ┌─────────────────────┐
//!                           │ SqliteEngine        │
//!                           │ in-memory SQLite    │
//!                           └─────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **No unescaped input in SQL**: values are parameters; identifiers go through
//!    [`sql::escape_identifier`]
//! 2. **Self-contained history**: an entry can be undone and redone without
//!    asking the database what used to be there
//! 3. **Rowids are validated**: invalid row ids reject the operation, never become 0
//! 4. **Every call resolves**: with a result, an error text, a timeout, or a
//!    closed channel; the pending registry never leaks
//! 5. **Batches are atomic**: a failed cell batch leaves every row as it was
//!
//! ## Module Organization
//!
//! - [`error`]: The crate's error type
//! - [`types`], [`modification`]: Values, rows, and history entries
//! - [`sql`], [`query`], [`merge_patch`]: Statement building blocks
//! - [`engine`]: The synchronous SQLite engine
//! - [`tracker`]: Undo/redo timeline
//! - [`rpc`], [`codec`], [`remote`]: Transport between caller and engine
//! - [`worker`], [`native`], [`audit`]: Backends behind [`DatabaseOperations`]
//! - [`document`]: The per-file controller

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for litedit operations.
pub mod error;

/// Configuration structs and their defaults.
pub mod config;

/// Cell values, row ids, column definitions and result sets.
pub mod types;

/// Identifier and literal escaping, column-type validation, literal redaction.
pub mod sql;

/// SELECT and COUNT construction from read options.
pub mod query;

/// RFC 7396 JSON merge patch.
pub mod merge_patch;

/// History entries and their per-type payloads.
pub mod modification;

/// Undo/redo timeline with a save checkpoint and hot-exit codec.
pub mod tracker;

/// The SQLite engine.
///
/// Owns one in-memory connection and implements every operation the editor
/// performs, including undo and redo of recorded entries. Synchronous; it is
/// always driven from a single thread or process.
pub mod engine;

/// The async backend contract.
pub mod operations;

/// Correlation-id request/response transport.
pub mod rpc;

/// Length-prefixed frames for byte-stream channels.
pub mod codec;

/// The engine's method table, served and called over RPC.
pub mod remote;

/// Engine on a dedicated thread.
pub mod worker;

/// Engine in a child process.
pub mod native;

/// Logging decorator with redaction.
pub mod audit;

/// Per-file controller: edits, history, persistence.
pub mod document;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::{AuditLog, AuditOutcome, AuditRecord, AuditedDatabase};
pub use config::{AuditConfig, Backend, DocumentConfig, RpcConfig};
pub use document::{AbortSignal, DatabaseDocument};
pub use engine::SqliteEngine;
pub use error::{Error, Result};
pub use modification::{Modification, ModificationEntry, ModificationType};
pub use native::NativeDatabase;
pub use operations::DatabaseOperations;
pub use query::{ColumnFilter, ReadOptions, SortDirection};
pub use remote::RemoteDatabase;
pub use tracker::ModificationTracker;
pub use types::{
    CellUpdate, CellValue, ColumnDef, ColumnInfo, ColumnValue, RecordId, ResultSet, SchemaSnapshot,
};
pub use worker::WorkerDatabase;
