//! # The Backend Seam
//!
//! [`DatabaseOperations`] is what the document controller talks to. It is
//! implemented by every engine backend:
//!
//! | Backend | Where the engine runs | Module |
//! |---------|-----------------------|--------|
//! | [`WorkerDatabase`](crate::worker::WorkerDatabase) | dedicated thread, in-process channel | `worker` |
//! | [`NativeDatabase`](crate::native::NativeDatabase) | child process, stdio frames | `native` |
//! | [`AuditedDatabase`](crate::audit::AuditedDatabase) | decorator over either | `audit` |
//!
//! Every method is async because every backend crosses an RPC boundary. The
//! engine itself is synchronous and processes one call at a time, in arrival
//! order.
//!
//! ## Rust Pattern: async-trait
//!
//! The trait is used as `Arc<dyn DatabaseOperations>`, so it must be object
//! safe. `#[async_trait]` boxes each returned future to make that possible.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::modification::ModificationEntry;
use crate::query::ReadOptions;
use crate::types::{
    CellUpdate, CellValue, ColumnDef, ColumnInfo, ColumnValue, RecordId, ResultSet, SchemaSnapshot,
};

/// The uniform operations contract for an engine backend.
///
/// One instance serves exactly one open document.
#[async_trait]
pub trait DatabaseOperations: Send + Sync {
    // Lifecycle

    /// Opens an empty database.
    async fn create_database(&self) -> Result<()>;

    /// Opens a database from a complete SQLite file image.
    async fn load_database(&self, image: Vec<u8>) -> Result<()>;

    /// Opens a database by reading the file at `path` on the engine's side.
    async fn open_file(&self, path: &Path) -> Result<()>;

    /// Liveness check.
    async fn ping(&self) -> Result<bool>;

    /// Closes the engine. Calling it twice is a caller error.
    async fn shutdown(&self) -> Result<()>;

    // Queries

    async fn execute_query(&self, sql: &str, params: &[CellValue]) -> Result<Vec<ResultSet>>;

    async fn fetch_table_data(&self, table: &str, options: &ReadOptions) -> Result<ResultSet>;

    async fn fetch_table_count(&self, table: &str, options: &ReadOptions) -> Result<i64>;

    async fn fetch_schema(&self) -> Result<SchemaSnapshot>;

    async fn get_table_info(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn get_pragmas(&self) -> Result<BTreeMap<String, CellValue>>;

    async fn set_pragma(&self, name: &str, value: &CellValue) -> Result<()>;

    // Mutations

    async fn update_cell(
        &self,
        table: &str,
        row_id: RecordId,
        column: &str,
        value: &CellValue,
        patch: Option<&serde_json::Value>,
    ) -> Result<()>;

    async fn insert_row(&self, table: &str, data: &[ColumnValue]) -> Result<Option<i64>>;

    async fn delete_rows(&self, table: &str, row_ids: &[RecordId]) -> Result<()>;

    async fn delete_columns(&self, table: &str, columns: &[String]) -> Result<()>;

    async fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<()>;

    async fn update_cell_batch(&self, table: &str, updates: &[CellUpdate]) -> Result<()>;

    async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: &str,
        default_value: Option<&str>,
    ) -> Result<()>;

    // History

    async fn undo_modification(&self, entry: &ModificationEntry) -> Result<()>;

    async fn redo_modification(&self, entry: &ModificationEntry) -> Result<()>;

    // Export

    async fn serialize_database(&self) -> Result<Vec<u8>>;

    async fn write_to_file(&self, path: &Path) -> Result<()>;
}
