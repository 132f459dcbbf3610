//! # SQLite Engine
//!
//! [`SqliteEngine`] owns one SQLite connection holding an in-memory copy of
//! the document's database. Every operation the editor performs lands here,
//! whether it arrived through a worker thread or a child process.
//!
//! ## Lifecycle
//!
//! ```text
//!                create_database()
//!                load_database(image)
//!  Uninitialized ─────open_file(path)────► Open ───shutdown()───► Closed
//!        │                                   │                      │
//!        └── any other call: NotInitialized  └── all operations     └── NotInitialized
//! ```
//!
//! The database always lives in memory. Images are moved in and out with
//! SQLite's online backup API, so edits never touch the file on disk until
//! [`SqliteEngine::write_to_file`] or [`SqliteEngine::serialize_database`].
//!
//! ## Statement Safety
//!
//! Identifiers go through [`escape_identifier`]; values are bound as
//! parameters. The only text interpolated from the caller besides
//! identifiers is a pragma name (checked against [`ALLOWED_PRAGMAS`]), a
//! pragma value (integers and bare words only), a column type (validated by
//! [`crate::sql::validate_column_type`]) and a `DEFAULT` clause (rendered as
//! a literal).
//!
//! ## Transactions
//!
//! Multi-statement operations (`update_cell_batch`, multi-row undo/redo) run
//! in one transaction:
//!
//! ```text
//! BEGIN IMMEDIATE ──► statements ──► COMMIT
//!                        │
//!                        └─ error ──► ROLLBACK (failure swallowed) ──► original error
//! ```
//!
//! If the caller already opened a transaction through `execute_query`, a
//! SAVEPOINT is used instead so the caller's transaction stays intact.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use rusqlite::backup::Progress;
use rusqlite::{params_from_iter, Batch, Connection, DatabaseName, OptionalExtension, Statement};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::merge_patch::{apply_merge_patch, parse_or_empty};
use crate::modification::{Modification, ModificationEntry, RowSnapshot};
use crate::query::{build_count_query, build_select_query, ReadOptions};
use crate::sql::{
    column_definition, default_clause, escape_identifier, placeholders, quote_literal,
    validate_column_type,
};
use crate::types::{
    CellOperation, CellUpdate, CellValue, ColumnDef, ColumnInfo, ColumnValue, RecordId, ResultSet,
    SchemaObject, SchemaSnapshot,
};

// =============================================================================
// Constants
// =============================================================================

/// Pragmas that may be read and written through the editor.
///
/// Pragma names cannot be bound as parameters. Anything not listed here is
/// refused before a statement is built.
pub const ALLOWED_PRAGMAS: &[&str] = &[
    "application_id",
    "auto_vacuum",
    "busy_timeout",
    "cache_size",
    "case_sensitive_like",
    "foreign_keys",
    "journal_mode",
    "locking_mode",
    "page_size",
    "recursive_triggers",
    "secure_delete",
    "synchronous",
    "temp_store",
    "user_version",
    "wal_autocheckpoint",
];

/// Savepoint name used when a transaction is already open.
const NESTED_SAVEPOINT: &str = "litedit_nested";

/// Length of the SQLite file header.
const SQLITE_HEADER_LEN: usize = 100;

// =============================================================================
// Engine
// =============================================================================

enum EngineState {
    Uninitialized,
    Open(Connection),
    Closed,
}

/// A SQLite database held in memory.
///
/// # Rust Pattern: State as Enum
///
/// The connection only exists inside `EngineState::Open`, so there is no way
/// to reach a closed or never-opened handle: [`SqliteEngine::conn`] returns
/// [`Error::NotInitialized`] for every other state.
pub struct SqliteEngine {
    state: EngineState,
}

impl Default for SqliteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteEngine {
    /// Creates an engine with no database yet.
    pub fn new() -> Self {
        Self {
            state: EngineState::Uninitialized,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, EngineState::Open(_))
    }

    /// True once [`shutdown`](Self::shutdown) has released the connection.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, EngineState::Closed)
    }

    fn conn(&self) -> Result<&Connection> {
        match &self.state {
            EngineState::Open(conn) => Ok(conn),
            _ => Err(Error::NotInitialized),
        }
    }

    fn ensure_uninitialized(&self) -> Result<()> {
        match self.state {
            EngineState::Uninitialized => Ok(()),
            _ => Err(Error::Validation("database already opened".to_string())),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens an empty database.
    pub fn create_database(&mut self) -> Result<()> {
        self.ensure_uninitialized()?;
        let conn = Connection::open_in_memory()?;
        self.state = EngineState::Open(conn);
        info!("created empty database");
        Ok(())
    }

    /// Opens a database from a complete SQLite file image.
    ///
    /// An empty image opens an empty database (a brand-new file). The image
    /// is staged in a temporary file and restored with the backup API, since
    /// `Connection::deserialize` only takes buffers from SQLite's allocator.
    pub fn load_database(&mut self, image: &[u8]) -> Result<()> {
        self.ensure_uninitialized()?;
        if image.is_empty() {
            return self.create_database();
        }

        let mut staging = tempfile::NamedTempFile::new()?;
        staging.write_all(image)?;
        staging.flush()?;

        let conn = restore_into_memory(staging.path(), page_size_from_header(image))?;
        self.state = EngineState::Open(conn);
        info!(bytes = image.len(), "loaded database image");
        Ok(())
    }

    /// Opens a database by copying the file at `path` into memory.
    pub fn open_file(&mut self, path: &Path) -> Result<()> {
        self.ensure_uninitialized()?;

        let mut header = Vec::with_capacity(SQLITE_HEADER_LEN);
        File::open(path)?
            .take(SQLITE_HEADER_LEN as u64)
            .read_to_end(&mut header)?;
        if header.is_empty() {
            return self.create_database();
        }

        let conn = restore_into_memory(path, page_size_from_header(&header))?;
        self.state = EngineState::Open(conn);
        info!(path = %path.display(), "opened database file");
        Ok(())
    }

    /// Releases the connection. A second call fails with `NotInitialized`.
    pub fn shutdown(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, EngineState::Closed) {
            EngineState::Open(conn) => {
                conn.close().map_err(|(_, e)| Error::from(e))?;
                info!("database closed");
                Ok(())
            }
            EngineState::Uninitialized => {
                self.state = EngineState::Uninitialized;
                Err(Error::NotInitialized)
            }
            EngineState::Closed => Err(Error::NotInitialized),
        }
    }

    /// Liveness check.
    pub fn ping(&self) -> bool {
        true
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Returns the complete database image, read straight out of memory.
    pub fn serialize_database(&self) -> Result<Vec<u8>> {
        let conn = self.conn()?;
        let image = conn.serialize(DatabaseName::Main)?;
        Ok(image.to_vec())
    }

    /// Writes the complete database image to `path`, replacing its contents.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let conn = self.conn()?;
        conn.backup(DatabaseName::Main, path, None::<fn(Progress)>)?;
        debug!(path = %path.display(), "database written to file");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Runs one or more statements and returns one result set per statement.
    ///
    /// Statements that produce no rows (DDL, DML) yield an empty result set.
    /// `params` are bound to the first statement only.
    pub fn execute_query(&self, sql: &str, params: &[CellValue]) -> Result<Vec<ResultSet>> {
        let conn = self.conn()?;
        let mut batch = Batch::new(conn, sql);
        let mut results = Vec::new();

        // SQLite's own parser finds statement boundaries and skips comment-only tails
        while let Some(mut stmt) = batch.next()? {
            let bound: &[CellValue] = if results.is_empty() { params } else { &[] };
            results.push(read_result_set(&mut stmt, bound)?);
        }

        Ok(results)
    }

    /// Fetches one page of a table.
    ///
    /// With a global filter and no explicit projection, the table's columns
    /// are resolved first so the filter has something to search.
    pub fn fetch_table_data(&self, table: &str, options: &ReadOptions) -> Result<ResultSet> {
        let conn = self.conn()?;
        let options = self.resolve_filter_columns(table, options)?;
        let query = build_select_query(table, &options);
        let mut stmt = conn.prepare(&query.sql)?;
        read_result_set(&mut stmt, &query.params)
    }

    /// Counts the rows [`fetch_table_data`](Self::fetch_table_data) would page through.
    pub fn fetch_table_count(&self, table: &str, options: &ReadOptions) -> Result<i64> {
        let conn = self.conn()?;
        let options = self.resolve_filter_columns(table, options)?;
        let query = build_count_query(table, &options);
        let count = conn.query_row(&query.sql, params_from_iter(query.params.iter()), |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(count)
    }

    fn resolve_filter_columns(&self, table: &str, options: &ReadOptions) -> Result<ReadOptions> {
        let wants_global = options.global_filter.as_deref().is_some_and(|g| !g.is_empty());
        let has_columns = options.columns.as_ref().is_some_and(|c| !c.is_empty());
        let mut resolved = options.clone();
        if wants_global && !has_columns {
            let columns = self
                .get_table_info(table)?
                .into_iter()
                .map(|c| c.name)
                .collect();
            resolved.columns = Some(columns);
        }
        Ok(resolved)
    }

    /// Lists tables, views and indexes, excluding SQLite's internal objects.
    pub fn fetch_schema(&self) -> Result<SchemaSnapshot> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT type, name, tbl_name, sql FROM sqlite_master \
             WHERE name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                SchemaObject {
                    name: row.get(1)?,
                    table_name: row.get(2)?,
                    sql: row.get(3)?,
                },
            ))
        })?;

        let mut snapshot = SchemaSnapshot::default();
        for row in rows {
            let (kind, object) = row?;
            match kind.as_str() {
                "table" => snapshot.tables.push(object),
                "view" => snapshot.views.push(object),
                "index" => snapshot.indexes.push(object),
                _ => {}
            }
        }
        Ok(snapshot)
    }

    /// Returns `PRAGMA table_info` for a table.
    pub fn get_table_info(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?)",
        )?;
        let rows = stmt.query_map([table], |row| {
            let default_value = match row.get::<_, CellValue>(4)? {
                CellValue::Null => None,
                CellValue::Text(s) => Some(s),
                other => Some(crate::sql::cell_value_to_sql(&other)),
            };
            Ok(ColumnInfo {
                cid: row.get(0)?,
                name: row.get(1)?,
                column_type: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                default_value,
                primary_key: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // =========================================================================
    // Pragmas
    // =========================================================================

    /// Reads every allow-listed pragma.
    pub fn get_pragmas(&self) -> Result<BTreeMap<String, CellValue>> {
        let conn = self.conn()?;
        let mut values = BTreeMap::new();
        for name in ALLOWED_PRAGMAS {
            let mut stmt = conn.prepare(&format!("PRAGMA {name}"))?;
            let value = stmt
                .query_row([], |row| row.get::<_, CellValue>(0))
                .optional()?
                .unwrap_or_default();
            values.insert((*name).to_string(), value);
        }
        Ok(values)
    }

    /// Sets an allow-listed pragma to an integer or bare-word value.
    pub fn set_pragma(&self, name: &str, value: &CellValue) -> Result<()> {
        let name = allowed_pragma(name)?;
        let rendered = match value {
            CellValue::Integer(i) => i.to_string(),
            CellValue::Text(s) if is_bare_word(s) => s.clone(),
            CellValue::Text(s) => quote_literal(s),
            other => {
                return Err(Error::UnsupportedPragmaValue(format!(
                    "{} value for pragma '{name}'",
                    other.type_name()
                )))
            }
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("PRAGMA {name} = {rendered}"))?;
        drain(&mut stmt)?;
        debug!(pragma = name, "pragma set");
        Ok(())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Writes one cell, either directly or by merge-patching its JSON text.
    pub fn update_cell(
        &self,
        table: &str,
        row_id: RecordId,
        column: &str,
        value: &CellValue,
        patch: Option<&serde_json::Value>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let update = CellUpdate {
            row_id,
            column: column.to_string(),
            value: value.clone(),
            patch: patch.cloned(),
        };
        match update.operation() {
            CellOperation::Set => apply_update_group(conn, table, column, CellOperation::Set, &[&update]),
            CellOperation::JsonPatch => in_transaction(conn, |conn| {
                apply_update_group(conn, table, column, CellOperation::JsonPatch, &[&update])
            }),
        }
    }

    /// Inserts a row and returns its rowid.
    pub fn insert_row(&self, table: &str, data: &[ColumnValue]) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let inserted = if data.is_empty() {
            conn.execute(&format!("INSERT INTO {} DEFAULT VALUES", escape_identifier(table)), [])?
        } else {
            let columns: Vec<String> = data.iter().map(|d| escape_identifier(&d.column)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                escape_identifier(table),
                columns.join(", "),
                placeholders(data.len())
            );
            conn.execute(&sql, params_from_iter(data.iter().map(|d| &d.value)))?
        };

        // zero and negative rowids are legal; only a skipped insert has none
        Ok((inserted == 1).then(|| conn.last_insert_rowid()))
    }

    /// Deletes rows by rowid in one statement.
    pub fn delete_rows(&self, table: &str, row_ids: &[RecordId]) -> Result<()> {
        let conn = self.conn()?;
        delete_by_rowid(conn, table, row_ids)
    }

    /// Drops columns one `ALTER TABLE` at a time inside one transaction.
    ///
    /// A column SQLite refuses to drop rolls back the ones before it.
    pub fn delete_columns(&self, table: &str, columns: &[String]) -> Result<()> {
        let conn = self.conn()?;
        in_transaction(conn, |conn| {
            for column in columns {
                drop_column(conn, table, column)?;
            }
            Ok(())
        })
    }

    /// Creates a table from structured column definitions.
    pub fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<()> {
        let conn = self.conn()?;
        let sql = create_table_sql(table, columns)?;
        conn.execute_batch(&sql)?;
        debug!(table, columns = columns.len(), "table created");
        Ok(())
    }

    /// Adds a column with an optional default.
    pub fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: &str,
        default_value: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        add_column(conn, table, column, column_type, default_value)
    }

    /// Applies many cell updates atomically.
    ///
    /// Everything is validated before `BEGIN`. Updates are grouped by
    /// `(column, operation)` in first-seen order, and each group runs through
    /// one prepared statement. Any failure rolls back the whole batch.
    pub fn update_cell_batch(&self, table: &str, updates: &[CellUpdate]) -> Result<()> {
        let conn = self.conn()?;
        if updates.is_empty() {
            return Ok(());
        }
        for update in updates {
            if update.column.is_empty() {
                return Err(Error::Validation("cell update has an empty column name".to_string()));
            }
        }

        let mut groups: Vec<((&str, CellOperation), Vec<&CellUpdate>)> = Vec::new();
        for update in updates {
            let key = (update.column.as_str(), update.operation());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(update),
                None => groups.push((key, vec![update])),
            }
        }

        in_transaction(conn, |conn| {
            for ((column, operation), members) in &groups {
                apply_update_group(conn, table, column, *operation, members)?;
            }
            Ok(())
        })
    }

    // =========================================================================
    // Undo / Redo
    // =========================================================================

    /// Reverses a recorded modification using only its captured payload.
    pub fn undo_modification(&self, entry: &ModificationEntry) -> Result<()> {
        let conn = self.conn()?;
        let table = entry.target_table.as_str();
        debug!(table, kind = entry.modification_type().as_str(), "undo");

        match &entry.change {
            Modification::CellUpdate { cells } => in_transaction(conn, |conn| {
                for cell in cells.iter().rev() {
                    write_cell(conn, table, &cell.column, cell.row_id, &cell.prior_value)?;
                }
                Ok(())
            }),
            Modification::RowInsert { rows } => {
                let ids: Vec<RecordId> = rows.iter().map(|r| RecordId::new(r.row_id)).collect();
                delete_by_rowid(conn, table, &ids)
            }
            Modification::RowDelete { rows } => in_transaction(conn, |conn| restore_rows(conn, table, rows)),
            Modification::TableCreate { .. } => drop_table(conn, table),
            Modification::ColumnAdd { column, .. } => drop_column(conn, table, column),
            Modification::ColumnDrop { columns } => in_transaction(conn, |conn| {
                for dropped in columns {
                    add_column(conn, table, &dropped.name, &dropped.column_type, None)?;
                }
                for dropped in columns {
                    let sql = format!(
                        "UPDATE {} SET {} = ? WHERE rowid = ?",
                        escape_identifier(table),
                        escape_identifier(&dropped.name)
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    for (row_id, value) in &dropped.data {
                        stmt.execute(rusqlite::params![value, row_id])?;
                    }
                }
                Ok(())
            }),
            Modification::TableDrop { create_sql, rows } => in_transaction(conn, |conn| {
                conn.execute_batch(create_sql)?;
                restore_rows(conn, table, rows)
            }),
        }
    }

    /// Re-applies a recorded modification using only its captured payload.
    pub fn redo_modification(&self, entry: &ModificationEntry) -> Result<()> {
        let conn = self.conn()?;
        let table = entry.target_table.as_str();
        debug!(table, kind = entry.modification_type().as_str(), "redo");

        match &entry.change {
            Modification::CellUpdate { cells } => in_transaction(conn, |conn| {
                for cell in cells {
                    write_cell(conn, table, &cell.column, cell.row_id, &cell.new_value)?;
                }
                Ok(())
            }),
            Modification::RowInsert { rows } => in_transaction(conn, |conn| restore_rows(conn, table, rows)),
            Modification::RowDelete { rows } => {
                let ids: Vec<RecordId> = rows.iter().map(|r| RecordId::new(r.row_id)).collect();
                delete_by_rowid(conn, table, &ids)
            }
            Modification::TableCreate { columns } => {
                conn.execute_batch(&create_table_sql(table, columns)?)?;
                Ok(())
            }
            Modification::ColumnAdd {
                column,
                column_type,
                default_value,
            } => add_column(conn, table, column, column_type, default_value.as_deref()),
            Modification::ColumnDrop { columns } => in_transaction(conn, |conn| {
                for dropped in columns {
                    drop_column(conn, table, &dropped.name)?;
                }
                Ok(())
            }),
            Modification::TableDrop { .. } => drop_table(conn, table),
        }
    }
}

// =============================================================================
// Statement Helpers
// =============================================================================

/// Opens an in-memory database and copies the file at `path` into it.
fn restore_into_memory(path: &Path, page_size: Option<u32>) -> Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    // an in-memory backup target cannot change page size once restoring
    if let Some(size) = page_size {
        conn.execute_batch(&format!("PRAGMA page_size = {size}"))?;
    }
    conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)?;
    Ok(conn)
}

/// Reads the page size from a SQLite header (offset 16, big-endian, 1 = 65536).
fn page_size_from_header(header: &[u8]) -> Option<u32> {
    if header.len() < 18 || !header.starts_with(b"SQLite format 3\0") {
        return None;
    }
    match u16::from_be_bytes([header[16], header[17]]) {
        1 => Some(65_536),
        size if size >= 512 => Some(u32::from(size)),
        _ => None,
    }
}

/// Runs a prepared statement and collects every row.
fn read_result_set(stmt: &mut Statement<'_>, params: &[CellValue]) -> Result<ResultSet> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = Vec::new();

    let mut cursor = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(CellValue::from(row.get_ref(i)?));
        }
        rows.push(values);
    }

    Ok(ResultSet { columns, rows })
}

/// Steps a statement to completion, ignoring any rows.
fn drain(stmt: &mut Statement<'_>) -> Result<()> {
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}

/// Runs `f` inside a transaction, or a savepoint if one is already open.
fn in_transaction<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let nested = !conn.is_autocommit();
    if nested {
        conn.execute_batch(&format!("SAVEPOINT {NESTED_SAVEPOINT}"))?;
    } else {
        conn.execute_batch("BEGIN IMMEDIATE")?;
    }

    let outcome = f(conn).and_then(|value| {
        let commit = if nested {
            format!("RELEASE {NESTED_SAVEPOINT}")
        } else {
            "COMMIT".to_string()
        };
        conn.execute_batch(&commit)?;
        Ok(value)
    });

    if outcome.is_err() {
        let rollback = if nested {
            format!("ROLLBACK TO {NESTED_SAVEPOINT}; RELEASE {NESTED_SAVEPOINT}")
        } else {
            "ROLLBACK".to_string()
        };
        if let Err(e) = conn.execute_batch(&rollback) {
            warn!(error = %e, "rollback failed; transaction presumed already aborted");
        }
    }

    outcome
}

fn allowed_pragma(name: &str) -> Result<&'static str> {
    let normalized = name.trim().to_ascii_lowercase();
    ALLOWED_PRAGMAS
        .iter()
        .copied()
        .find(|p| *p == normalized)
        .ok_or_else(|| Error::PragmaNotAllowed(name.to_string()))
}

fn is_bare_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_cell(conn: &Connection, table: &str, column: &str, row_id: i64, value: &CellValue) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET {} = ? WHERE rowid = ?",
        escape_identifier(table),
        escape_identifier(column)
    );
    conn.prepare_cached(&sql)?.execute(rusqlite::params![value, row_id])?;
    Ok(())
}

/// Runs one `(column, operation)` group through a single prepared statement.
fn apply_update_group(
    conn: &Connection,
    table: &str,
    column: &str,
    operation: CellOperation,
    updates: &[&CellUpdate],
) -> Result<()> {
    debug!(table, column, ?operation, rows = updates.len(), "cell update group");
    let update_sql = format!(
        "UPDATE {} SET {} = ? WHERE rowid = ?",
        escape_identifier(table),
        escape_identifier(column)
    );
    let mut update_stmt = conn.prepare(&update_sql)?;

    match operation {
        CellOperation::Set => {
            for update in updates {
                update_stmt.execute(rusqlite::params![update.value, update.row_id])?;
            }
        }
        CellOperation::JsonPatch => {
            let select_sql = format!(
                "SELECT {} FROM {} WHERE rowid = ?",
                escape_identifier(column),
                escape_identifier(table)
            );
            let mut select_stmt = conn.prepare(&select_sql)?;
            for update in updates {
                let current = select_stmt
                    .query_row([update.row_id], |row| row.get::<_, CellValue>(0))
                    .optional()?
                    .unwrap_or_default();
                let patch = update.patch.as_ref().unwrap_or(&serde_json::Value::Null);
                let merged = apply_merge_patch(&parse_or_empty(current.as_text()), patch);
                let text = serde_json::to_string(&merged)?;
                update_stmt.execute(rusqlite::params![text, update.row_id])?;
            }
        }
    }
    Ok(())
}

fn delete_by_rowid(conn: &Connection, table: &str, row_ids: &[RecordId]) -> Result<()> {
    if row_ids.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "DELETE FROM {} WHERE rowid IN ({})",
        escape_identifier(table),
        placeholders(row_ids.len())
    );
    conn.execute(&sql, params_from_iter(row_ids.iter()))?;
    Ok(())
}

fn drop_column(conn: &Connection, table: &str, column: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "ALTER TABLE {} DROP COLUMN {}",
        escape_identifier(table),
        escape_identifier(column)
    ))?;
    Ok(())
}

fn drop_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE {}", escape_identifier(table)))?;
    Ok(())
}

fn add_column(
    conn: &Connection,
    table: &str,
    column: &str,
    column_type: &str,
    default_value: Option<&str>,
) -> Result<()> {
    let column_type = validate_column_type(column_type)?;
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {}",
        escape_identifier(table),
        escape_identifier(column)
    );
    if !column_type.is_empty() {
        sql.push(' ');
        sql.push_str(column_type);
    }
    if let Some(default_value) = default_value {
        sql.push_str(&default_clause(default_value));
    }
    conn.execute_batch(&sql)?;
    Ok(())
}

/// Builds `CREATE TABLE`. More than one key column becomes a table constraint.
fn create_table_sql(table: &str, columns: &[ColumnDef]) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::Validation(format!(
            "table '{table}' needs at least one column"
        )));
    }

    let key_columns: Vec<&ColumnDef> = columns.iter().filter(|c| c.primary_key).collect();
    let inline_key = key_columns.len() == 1;

    let mut parts = columns
        .iter()
        .map(|c| column_definition(&c.name, &c.column_type, c.primary_key && inline_key, c.not_null))
        .collect::<Result<Vec<_>>>()?;

    if key_columns.len() > 1 {
        let names: Vec<String> = key_columns.iter().map(|c| escape_identifier(&c.name)).collect();
        parts.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        escape_identifier(table),
        parts.join(", ")
    ))
}

/// Returns the `INTEGER PRIMARY KEY` column that aliases rowid, if any.
fn rowid_alias(conn: &Connection, table: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?) WHERE pk > 0")?;
    let keys = stmt
        .query_map([table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(match keys.as_slice() {
        [(name, column_type)] if column_type.eq_ignore_ascii_case("INTEGER") => Some(name.clone()),
        _ => None,
    })
}

/// Reinserts captured rows with their original rowids.
fn restore_rows(conn: &Connection, table: &str, rows: &[RowSnapshot]) -> Result<()> {
    let alias = rowid_alias(conn, table)?;

    for row in rows {
        let carries_alias = alias.as_deref().is_some_and(|alias| {
            row.values.iter().any(|v| v.column.eq_ignore_ascii_case(alias))
        });

        let mut columns = Vec::with_capacity(row.values.len() + 1);
        let mut values = Vec::with_capacity(row.values.len() + 1);
        if !carries_alias {
            columns.push(escape_identifier("rowid"));
            values.push(CellValue::Integer(row.row_id));
        }
        for value in &row.values {
            columns.push(escape_identifier(&value.column));
            values.push(value.value.clone());
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            escape_identifier(table),
            columns.join(", "),
            placeholders(values.len())
        );
        conn.prepare_cached(&sql)?.execute(params_from_iter(values.iter()))?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
