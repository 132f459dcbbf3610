//! # Document Controller
//!
//! A [`DatabaseDocument`] is one open database file in the host editor. It
//! owns a backend (through the [`DatabaseOperations`] seam), the undo/redo
//! [`ModificationTracker`], and the recovery state that ties the two
//! together.
//!
//! ## The Edit Cycle
//!
//! ```text
//!  edit request
//!      │
//!      ├─► capture what the edit destroys (prior cells, full rows, column data, DDL)
//!      ├─► backend mutation
//!      ├─► capture what the edit created (new rowid, patched JSON text)
//!      └─► tracker.record(entry)
//! ```
//!
//! Every entry is captured on this side, before and after the mutation, so
//! the engine's undo/redo never needs to query what used to be there.
//!
//! ## Recovery Mode
//!
//! If an undo or redo fails, the in-memory history no longer describes the
//! database. The document logs at `error` level and refuses every further
//! mutation with [`Error::RecoveryMode`] until [`DatabaseDocument::revert`]
//! reloads from disk. Reads keep working.
//!
//! ## Hot Exit
//!
//! [`DatabaseDocument::backup`] serializes the tracker.
//! [`DatabaseDocument::restore_backup`] reopens the saved file, walks back
//! any saved entries that were undone in memory, then replays the uncommitted
//! entries. An [`AbortSignal`] is checked between steps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, AuditedDatabase};
use crate::config::{Backend, DocumentConfig};
use crate::error::{Error, Result};
use crate::merge_patch::generate_merge_patch;
use crate::modification::{CellChange, DroppedColumn, Modification, ModificationEntry, RowSnapshot};
use crate::native::NativeDatabase;
use crate::operations::DatabaseOperations;
use crate::query::ReadOptions;
use crate::sql::{escape_identifier, placeholders};
use crate::tracker::ModificationTracker;
use crate::types::{CellUpdate, CellValue, ColumnDef, ColumnValue, RecordId, ResultSet};
use crate::worker::WorkerDatabase;

/// Column alias used when snapshotting rows.
///
/// `SELECT rowid, *` would report the rowid column under the name of an
/// `INTEGER PRIMARY KEY` alias, so the rowid is always selected under this
/// name instead.
const ROWID_KEY: &str = "__litedit_rowid";

// =============================================================================
// Abort Signal
// =============================================================================

/// Cooperative cancellation flag.
///
/// Cloning shares the flag. Checked between statements, never mid-statement.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`Error::Cancelled`] once aborted.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn check(signal: Option<&AbortSignal>) -> Result<()> {
    signal.map_or(Ok(()), AbortSignal::check)
}

// =============================================================================
// Connecting
// =============================================================================

/// Starts the configured backend, wrapped in the audit decorator.
async fn connect(config: &DocumentConfig, log: &Arc<AuditLog>) -> Result<Arc<dyn DatabaseOperations>> {
    match &config.backend {
        Backend::Worker => {
            let worker = WorkerDatabase::spawn(config.rpc.clone())?;
            Ok(Arc::new(AuditedDatabase::with_log(worker, Arc::clone(log))))
        }
        Backend::Native { program } => {
            let native = NativeDatabase::spawn(program, config.rpc.clone(), config.health_check_timeout)?;
            if !native.health_check().await {
                return Err(Error::ChannelClosed(format!(
                    "native worker {} failed its health check",
                    program.display()
                )));
            }
            Ok(Arc::new(AuditedDatabase::with_log(native, Arc::clone(log))))
        }
    }
}

/// Opens the file at `path` in a fresh backend, or an empty database if
/// there is no file yet.
async fn load_contents(backend: &dyn DatabaseOperations, config: &DocumentConfig, path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return backend.create_database().await;
    };

    match config.backend {
        // the native engine reads the file itself
        Backend::Native { .. } => {
            if tokio::fs::try_exists(path).await? {
                backend.open_file(path).await
            } else {
                backend.create_database().await
            }
        }
        Backend::Worker => match tokio::fs::read(path).await {
            Ok(image) => backend.load_database(image).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => backend.create_database().await,
            Err(e) => Err(e.into()),
        },
    }
}

// =============================================================================
// Document
// =============================================================================

/// One open database with its edit history.
pub struct DatabaseDocument {
    path: Option<PathBuf>,
    config: DocumentConfig,
    backend: Arc<dyn DatabaseOperations>,
    tracker: ModificationTracker,
    audit_log: Arc<AuditLog>,

    /// Set after a failed undo/redo; cleared by revert.
    recovery: Option<String>,
}

impl DatabaseDocument {
    /// Opens the database at `path`. A missing file opens as an empty
    /// database that will be created on first save.
    pub async fn open(path: impl Into<PathBuf>, config: DocumentConfig) -> Result<Self> {
        let path = path.into();
        let document = Self::connect(Some(path), config).await?;
        info!(path = ?document.path, "document opened");
        Ok(document)
    }

    /// Creates an untitled, empty database. Save it with [`save_as`](Self::save_as).
    pub async fn create(config: DocumentConfig) -> Result<Self> {
        Self::connect(None, config).await
    }

    async fn connect(path: Option<PathBuf>, config: DocumentConfig) -> Result<Self> {
        let audit_log = Arc::new(AuditLog::new(&config.audit));
        let backend = connect(&config, &audit_log).await?;
        load_contents(backend.as_ref(), &config, path.as_deref()).await?;

        Ok(Self {
            path,
            tracker: ModificationTracker::new(config.max_history),
            config,
            backend,
            audit_log,
            recovery: None,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The backend, for reads that do not touch history.
    pub fn backend(&self) -> &Arc<dyn DatabaseOperations> {
        &self.backend
    }

    pub fn tracker(&self) -> &ModificationTracker {
        &self.tracker
    }

    pub fn audit_log(&self) -> Arc<AuditLog> {
        Arc::clone(&self.audit_log)
    }

    /// True if there are changes the file on disk does not have.
    pub fn is_dirty(&self) -> bool {
        self.tracker.has_uncommitted_changes()
    }

    /// Why the document is read-only, if it is.
    pub fn recovery_reason(&self) -> Option<&str> {
        self.recovery.as_deref()
    }

    fn ensure_writable(&self) -> Result<()> {
        match &self.recovery {
            Some(reason) => Err(Error::RecoveryMode(reason.clone())),
            None => Ok(()),
        }
    }

    fn record(&mut self, entry: ModificationEntry) {
        debug!(
            table = %entry.target_table,
            kind = entry.modification_type().as_str(),
            "modification recorded"
        );
        self.tracker.record(entry);
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches one page of a table and the total matching row count.
    pub async fn fetch_page(&self, table: &str, options: &ReadOptions) -> Result<(ResultSet, i64)> {
        futures::try_join!(
            self.backend.fetch_table_data(table, options),
            self.backend.fetch_table_count(table, options)
        )
    }

    /// Reads one column for a set of rows, keyed by rowid.
    async fn read_column(&self, table: &str, column: &str, row_ids: &[i64]) -> Result<HashMap<i64, CellValue>> {
        let sql = format!(
            "SELECT rowid AS {}, {} FROM {} WHERE rowid IN ({})",
            escape_identifier(ROWID_KEY),
            escape_identifier(column),
            escape_identifier(table),
            placeholders(row_ids.len())
        );
        let params: Vec<CellValue> = row_ids.iter().map(|&id| CellValue::Integer(id)).collect();
        let sets = self.backend.execute_query(&sql, &params).await?;

        let mut values = HashMap::with_capacity(row_ids.len());
        for row in sets.into_iter().next().unwrap_or_default().rows {
            let mut cells = row.into_iter();
            if let (Some(CellValue::Integer(id)), Some(value)) = (cells.next(), cells.next()) {
                values.insert(id, value);
            }
        }
        Ok(values)
    }

    async fn read_cell(&self, table: &str, row_id: RecordId, column: &str) -> Result<CellValue> {
        self.read_column(table, column, &[row_id.as_i64()])
            .await?
            .remove(&row_id.as_i64())
            .ok_or_else(|| Error::Validation(format!("row {row_id} not found in {table}")))
    }

    /// Captures complete rows, all of them when `row_ids` is `None`.
    async fn snapshot_rows(&self, table: &str, row_ids: Option<&[i64]>) -> Result<Vec<RowSnapshot>> {
        let mut sql = format!(
            "SELECT rowid AS {}, * FROM {}",
            escape_identifier(ROWID_KEY),
            escape_identifier(table)
        );
        let mut params = Vec::new();
        if let Some(ids) = row_ids {
            sql.push_str(&format!(" WHERE rowid IN ({})", placeholders(ids.len())));
            params.extend(ids.iter().map(|&id| CellValue::Integer(id)));
        }

        let set = self
            .backend
            .execute_query(&sql, &params)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(set.rows.len());
        for row in set.rows {
            let mut cells = row.into_iter();
            let Some(CellValue::Integer(row_id)) = cells.next() else {
                continue;
            };
            let values = set
                .columns
                .iter()
                .skip(1)
                .zip(cells)
                .map(|(column, value)| ColumnValue::new(column.clone(), value))
                .collect();
            rows.push(RowSnapshot { row_id, values });
        }
        Ok(rows)
    }

    // =========================================================================
    // Edits
    // =========================================================================

    /// Writes one cell.
    ///
    /// When both the old and the new value are JSON object text, only a
    /// merge patch is sent, so concurrent edits to other keys survive.
    pub async fn update_cell(&mut self, table: &str, row_id: RecordId, column: &str, value: CellValue) -> Result<()> {
        self.ensure_writable()?;
        let prior = self.read_cell(table, row_id, column).await?;
        let patch = json_patch_between(&prior, &value);

        self.backend
            .update_cell(table, row_id, column, &value, patch.as_ref())
            .await?;

        let new_value = match patch {
            Some(_) => self.read_cell(table, row_id, column).await?,
            None => value,
        };
        self.record(
            ModificationEntry::cell_update(table, row_id.as_i64(), column, prior, new_value)
                .with_label(format!("Edit {column}")),
        );
        Ok(())
    }

    /// Applies many cell updates in one transaction and records them as one
    /// history entry.
    pub async fn update_cell_batch(
        &mut self,
        table: &str,
        updates: &[CellUpdate],
        signal: Option<&AbortSignal>,
    ) -> Result<()> {
        self.ensure_writable()?;
        if updates.is_empty() {
            return Ok(());
        }

        let by_column = group_by_column(updates);
        let mut priors = HashMap::new();
        for (column, ids) in &by_column {
            check(signal)?;
            let values = self.read_column(table, column, ids).await?;
            for (id, value) in values {
                priors.insert((id, column.to_string()), value);
            }
        }
        check(signal)?;

        self.backend.update_cell_batch(table, updates).await?;

        let mut current = HashMap::new();
        for (column, ids) in &by_column {
            for (id, value) in self.read_column(table, column, ids).await? {
                current.insert((id, column.to_string()), value);
            }
        }

        let cells = updates
            .iter()
            .map(|u| {
                let key = (u.row_id.as_i64(), u.column.clone());
                CellChange {
                    row_id: u.row_id.as_i64(),
                    column: u.column.clone(),
                    prior_value: priors.get(&key).cloned().unwrap_or_default(),
                    new_value: current.get(&key).cloned().unwrap_or_default(),
                }
            })
            .collect();

        self.record(
            ModificationEntry::new(table, Modification::CellUpdate { cells })
                .with_label(format!("Edit {} cells", updates.len())),
        );
        Ok(())
    }

    /// Inserts a row and returns its rowid.
    pub async fn insert_row(&mut self, table: &str, data: &[ColumnValue]) -> Result<Option<i64>> {
        self.ensure_writable()?;
        let row_id = self.backend.insert_row(table, data).await?;

        match row_id {
            Some(id) => {
                let rows = self.snapshot_rows(table, Some(&[id])).await?;
                self.record(
                    ModificationEntry::new(table, Modification::RowInsert { rows })
                        .with_row_id(id)
                        .with_label("Insert row"),
                );
            }
            None => warn!(table, "insert wrote no row; not added to history"),
        }
        Ok(row_id)
    }

    /// Deletes rows, keeping their full contents for undo.
    pub async fn delete_rows(&mut self, table: &str, row_ids: &[RecordId]) -> Result<()> {
        self.ensure_writable()?;
        if row_ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = row_ids.iter().map(|id| id.as_i64()).collect();
        let rows = self.snapshot_rows(table, Some(&ids)).await?;
        self.backend.delete_rows(table, row_ids).await?;

        let label = match ids.len() {
            1 => "Delete row".to_string(),
            n => format!("Delete {n} rows"),
        };
        let mut entry = ModificationEntry::new(table, Modification::RowDelete { rows }).with_label(label);
        if let [only] = ids.as_slice() {
            entry = entry.with_row_id(*only);
        }
        self.record(entry);
        Ok(())
    }

    /// Drops columns, keeping every value they held for undo.
    pub async fn delete_columns(&mut self, table: &str, columns: &[String]) -> Result<()> {
        self.ensure_writable()?;
        if columns.is_empty() {
            return Err(Error::Validation("no columns to delete".to_string()));
        }

        let info = self.backend.get_table_info(table).await?;
        let mut dropped = Vec::with_capacity(columns.len());
        for name in columns {
            let column = info
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| Error::Validation(format!("no column {name} in {table}")))?;
            let sql = format!(
                "SELECT rowid, {} FROM {}",
                escape_identifier(name),
                escape_identifier(table)
            );
            let set = self.backend.execute_query(&sql, &[]).await?.into_iter().next().unwrap_or_default();
            let data = set
                .rows
                .into_iter()
                .filter_map(|row| {
                    let mut cells = row.into_iter();
                    match (cells.next(), cells.next()) {
                        (Some(CellValue::Integer(id)), Some(value)) => Some((id, value)),
                        _ => None,
                    }
                })
                .collect();
            dropped.push(DroppedColumn {
                name: name.clone(),
                column_type: column.column_type.clone(),
                data,
            });
        }

        self.backend.delete_columns(table, columns).await?;

        let mut entry = ModificationEntry::new(table, Modification::ColumnDrop { columns: dropped })
            .with_label(format!("Delete column {}", columns.join(", ")));
        if let [only] = columns {
            entry = entry.with_column(only.clone());
        }
        self.record(entry);
        Ok(())
    }

    pub async fn create_table(&mut self, table: &str, columns: &[ColumnDef]) -> Result<()> {
        self.ensure_writable()?;
        self.backend.create_table(table, columns).await?;
        self.record(
            ModificationEntry::new(table, Modification::TableCreate { columns: columns.to_vec() })
                .with_label(format!("Create table {table}")),
        );
        Ok(())
    }

    pub async fn add_column(
        &mut self,
        table: &str,
        column: &str,
        column_type: &str,
        default_value: Option<&str>,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.backend
            .add_column(table, column, column_type, default_value)
            .await?;
        self.record(
            ModificationEntry::new(
                table,
                Modification::ColumnAdd {
                    column: column.to_string(),
                    column_type: column_type.to_string(),
                    default_value: default_value.map(str::to_string),
                },
            )
            .with_column(column)
            .with_label(format!("Add column {column}")),
        );
        Ok(())
    }

    /// Drops a table, keeping its DDL and every row for undo. Indexes and
    /// triggers on the table are not restored by undo.
    pub async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.ensure_writable()?;
        let sets = self
            .backend
            .execute_query(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[CellValue::from(table)],
            )
            .await?;
        let create_sql = match sets.first().and_then(ResultSet::scalar) {
            Some(CellValue::Text(sql)) => sql.clone(),
            _ => return Err(Error::Validation(format!("no table named {table}"))),
        };
        let rows = self.snapshot_rows(table, None).await?;

        self.backend
            .execute_query(&format!("DROP TABLE {}", escape_identifier(table)), &[])
            .await?;
        self.record(
            ModificationEntry::new(table, Modification::TableDrop { create_sql, rows })
                .with_label(format!("Drop table {table}")),
        );
        Ok(())
    }

    // =========================================================================
    // Undo / Redo
    // =========================================================================

    /// Undoes the newest entry. Returns it, or `None` if there is nothing
    /// to undo.
    pub async fn undo(&mut self) -> Result<Option<ModificationEntry>> {
        self.ensure_writable()?;
        let Some(entry) = self.tracker.peek_back().cloned() else {
            return Ok(None);
        };

        if let Err(e) = self.backend.undo_modification(&entry).await {
            return Err(self.enter_recovery("undo", &entry, e));
        }
        self.tracker.step_back();
        Ok(Some(entry))
    }

    /// Redoes the most recently undone entry.
    pub async fn redo(&mut self) -> Result<Option<ModificationEntry>> {
        self.ensure_writable()?;
        let Some(entry) = self.tracker.peek_forward().cloned() else {
            return Ok(None);
        };

        if let Err(e) = self.backend.redo_modification(&entry).await {
            return Err(self.enter_recovery("redo", &entry, e));
        }
        self.tracker.step_forward();
        Ok(Some(entry))
    }

    fn enter_recovery(&mut self, action: &str, entry: &ModificationEntry, err: Error) -> Error {
        error!(
            action,
            table = %entry.target_table,
            kind = entry.modification_type().as_str(),
            error = %err,
            "history no longer matches the database; document is read-only until reverted"
        );
        self.recovery = Some(format!("{action} of {} failed: {err}", entry.modification_type().as_str()));
        err
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Writes the database to its file and marks the history as saved.
    pub async fn save(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| Error::Validation("untitled document has no path; use save_as".to_string()))?;
        self.write_image(&path).await?;
        self.tracker.create_checkpoint();
        info!(path = %path.display(), "document saved");
        Ok(())
    }

    /// Writes the database to `path`, which becomes the document's file.
    pub async fn save_as(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.write_image(&path).await?;
        self.tracker.create_checkpoint();
        info!(path = %path.display(), "document saved as");
        self.path = Some(path);
        Ok(())
    }

    async fn write_image(&self, path: &Path) -> Result<()> {
        match self.config.backend {
            Backend::Native { .. } => self.backend.write_to_file(path).await,
            Backend::Worker => {
                let image = self.backend.serialize_database().await?;
                tokio::fs::write(path, image).await?;
                Ok(())
            }
        }
    }

    /// Discards unsaved changes by reloading the file, and leaves recovery
    /// mode. Discarded edits stay on the redo stack.
    pub async fn revert(&mut self, signal: Option<&AbortSignal>) -> Result<()> {
        check(signal)?;
        let backend = connect(&self.config, &self.audit_log).await?;
        let loaded = load_contents(backend.as_ref(), &self.config, self.path.as_deref())
            .await
            .and_then(|()| check(signal));
        if let Err(e) = loaded {
            if let Err(shutdown) = backend.shutdown().await {
                warn!(error = %shutdown, "discarded backend did not shut down cleanly");
            }
            return Err(e);
        }

        let previous = std::mem::replace(&mut self.backend, backend);
        if let Err(e) = previous.shutdown().await {
            warn!(error = %e, "previous backend did not shut down cleanly");
        }

        let moved = self.tracker.rollback_to_checkpoint();
        self.recovery = None;
        info!(path = ?self.path, moved, "document reverted");
        Ok(())
    }

    /// Encodes the edit history for hot-exit backup.
    pub fn backup(&self) -> Result<Vec<u8>> {
        self.tracker.serialize()
    }

    /// Reopens `path` and reapplies a backup taken by [`backup`](Self::backup).
    pub async fn restore_backup(
        path: impl Into<PathBuf>,
        backup: &[u8],
        config: DocumentConfig,
        signal: Option<&AbortSignal>,
    ) -> Result<Self> {
        let tracker = ModificationTracker::deserialize(backup, config.max_history)?;
        let mut document = Self::connect(Some(path.into()), config).await?;

        for entry in tracker.saved_tail().iter().rev() {
            check(signal)?;
            document.backend.undo_modification(entry).await?;
        }
        for entry in tracker.uncommitted_entries() {
            check(signal)?;
            document.backend.redo_modification(entry).await?;
        }

        info!(
            path = ?document.path,
            replayed = tracker.uncommitted_entries().len(),
            unwound = tracker.saved_tail().len(),
            "document restored from backup"
        );
        document.tracker = tracker;
        Ok(document)
    }

    /// Shuts the backend down.
    pub async fn close(self) -> Result<()> {
        self.backend.shutdown().await?;
        info!(path = ?self.path, "document closed");
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// A merge patch between two JSON object texts, if both are objects.
fn json_patch_between(prior: &CellValue, next: &CellValue) -> Option<Value> {
    let (CellValue::Text(old), CellValue::Text(new)) = (prior, next) else {
        return None;
    };
    let old: Value = serde_json::from_str(old).ok()?;
    let new: Value = serde_json::from_str(new).ok()?;
    (old.is_object() && new.is_object()).then(|| generate_merge_patch(&old, &new))
}

/// Row ids per column, columns in first-seen order.
fn group_by_column(updates: &[CellUpdate]) -> Vec<(&str, Vec<i64>)> {
    let mut groups: Vec<(&str, Vec<i64>)> = Vec::new();
    for update in updates {
        let id = update.row_id.as_i64();
        match groups.iter_mut().find(|(column, _)| *column == update.column) {
            Some((_, ids)) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            None => groups.push((update.column.as_str(), vec![id])),
        }
    }
    groups
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_patch_only_between_objects() {
        let patch = json_patch_between(&CellValue::from(r#"{"a":1,"b":2}"#), &CellValue::from(r#"{"a":1,"b":3}"#));
        assert_eq!(patch, Some(json!({"b": 3})));

        assert_eq!(json_patch_between(&CellValue::from("[1]"), &CellValue::from("[2]")), None);
        assert_eq!(json_patch_between(&CellValue::from("plain"), &CellValue::from(r#"{"a":1}"#)), None);
        assert_eq!(json_patch_between(&CellValue::Null, &CellValue::from("{}")), None);
    }

    #[test]
    fn test_group_by_column_dedups_ids() {
        let updates = vec![
            CellUpdate::set(1i64, "a", 1),
            CellUpdate::set(2i64, "b", 1),
            CellUpdate::set(1i64, "a", 2),
        ];
        assert_eq!(group_by_column(&updates), vec![("a", vec![1]), ("b", vec![2])]);
    }

    #[test]
    fn test_abort_signal_is_shared() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        assert!(signal.check().is_ok());
        clone.abort();
        assert!(matches!(signal.check(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_json_cell_edit_sends_patch_and_records_stored_text() {
        let mut doc = DatabaseDocument::create(DocumentConfig::default()).await.unwrap();
        doc.backend()
            .execute_query(r#"CREATE TABLE t (doc TEXT); INSERT INTO t VALUES ('{"a":1,"b":2}')"#, &[])
            .await
            .unwrap();

        doc.update_cell("t", RecordId::new(1), "doc", CellValue::from(r#"{"a":1,"b":5}"#))
            .await
            .unwrap();

        let entry = doc.tracker().peek_back().unwrap().clone();
        let Modification::CellUpdate { cells } = &entry.change else {
            panic!("expected cell update");
        };
        assert_eq!(cells[0].prior_value, CellValue::from(r#"{"a":1,"b":2}"#));
        let stored: Value = match &cells[0].new_value {
            CellValue::Text(text) => serde_json::from_str(text).unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(stored, json!({"a": 1, "b": 5}));

        doc.undo().await.unwrap();
        let sets = doc.backend().execute_query("SELECT doc FROM t", &[]).await.unwrap();
        assert_eq!(sets[0].scalar(), Some(&CellValue::from(r#"{"a":1,"b":2}"#)));
    }

    #[tokio::test]
    async fn test_failed_undo_enters_recovery_until_revert() {
        let mut doc = DatabaseDocument::create(DocumentConfig::default()).await.unwrap();
        doc.create_table("t", &[ColumnDef::new("v", "TEXT")]).await.unwrap();
        // drop it behind the history's back so undoing the create fails
        doc.backend().execute_query("DROP TABLE t", &[]).await.unwrap();

        assert!(doc.undo().await.is_err());
        assert!(doc.recovery_reason().is_some());
        let err = doc.create_table("u", &[ColumnDef::new("v", "TEXT")]).await.unwrap_err();
        assert!(matches!(err, Error::RecoveryMode(_)));

        doc.revert(None).await.unwrap();
        assert!(doc.recovery_reason().is_none());
        doc.create_table("u", &[ColumnDef::new("v", "TEXT")]).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_revert_keeps_current_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let mut doc = DatabaseDocument::open(&path, DocumentConfig::default()).await.unwrap();
        doc.create_table("t", &[ColumnDef::new("v", "TEXT")]).await.unwrap();
        doc.save().await.unwrap();
        doc.insert_row("t", &[ColumnValue::new("v", "unsaved")]).await.unwrap();

        std::fs::write(&path, b"this is not a database, just some text").unwrap();
        assert!(doc.revert(None).await.is_err());

        // the document still edits through the backend it had
        assert!(doc.is_dirty());
        let sets = doc.backend().execute_query("SELECT v FROM t", &[]).await.unwrap();
        assert_eq!(sets[0].scalar(), Some(&CellValue::from("unsaved")));
        doc.insert_row("t", &[ColumnValue::new("v", "more")]).await.unwrap();
    }
}
