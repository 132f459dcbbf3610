//! # Audit Decorator
//!
//! [`AuditedDatabase`] wraps any [`DatabaseOperations`] backend and mirrors
//! every call into two places:
//!
//! - a `tracing` event under the `litedit::audit` target
//! - a bounded in-memory [`AuditLog`] the host can inspect
//!
//! ## Redaction
//!
//! Cell contents, row data, query parameters and file paths never reach
//! either sink. Values are reduced to their storage class and size:
//!
//! | Value | Rendered as |
//! |-------|-------------|
//! | `NULL` | `<null>` |
//! | integer | `<integer>` |
//! | float | `<float>` |
//! | text of N bytes | `<text:N>` |
//! | blob of N bytes | `<blob:N>` |
//!
//! SQL text keeps its shape but every literal in it becomes `?` (see
//! [`crate::sql::redact_literals`]); its parameters are only counted. Table
//! and column names are kept.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AuditConfig;
use crate::error::Result;
use crate::modification::ModificationEntry;
use crate::operations::DatabaseOperations;
use crate::query::ReadOptions;
use crate::sql::redact_literals;
use crate::types::{
    CellUpdate, CellValue, ColumnDef, ColumnInfo, ColumnValue, RecordId, ResultSet, SchemaSnapshot,
};

// =============================================================================
// Records
// =============================================================================

/// How an audited call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure(String),
}

impl AuditOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuditOutcome::Success)
    }
}

/// One audited call, already redacted.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Operation name as it appears on the wire, e.g. `updateCell`.
    pub operation: &'static str,
    pub table: Option<String>,
    pub detail: String,
    pub outcome: AuditOutcome,
    pub elapsed: Duration,
}

/// Bounded ring of recent [`AuditRecord`]s.
///
/// Shared between the decorator and whoever reads it, so it lives behind an
/// `Arc` and a mutex.
#[derive(Debug)]
pub struct AuditLog {
    records: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(config: &AuditConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn push(&self, record: AuditRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Copies out every record, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Copies out the failed calls only.
    pub fn failures(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| !r.outcome.is_success())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

// =============================================================================
// Redaction
// =============================================================================

/// Reduces a cell to its storage class and size.
pub fn redact_value(value: &CellValue) -> String {
    match value {
        CellValue::Null => "<null>".to_string(),
        CellValue::Integer(_) => "<integer>".to_string(),
        CellValue::Float(_) => "<float>".to_string(),
        CellValue::Text(s) => format!("<text:{}>", s.len()),
        CellValue::Blob(b) => format!("<blob:{}>", b.len()),
    }
}

fn redact_row(data: &[ColumnValue]) -> String {
    let fields: Vec<String> = data
        .iter()
        .map(|d| format!("{}={}", d.column, redact_value(&d.value)))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn redact_patch(patch: &Value) -> String {
    match patch.as_object() {
        Some(map) => format!("<patch:{} keys>", map.len()),
        None => "<patch>".to_string(),
    }
}

fn redact_path(_path: &Path) -> &'static str {
    "<path>"
}

fn describe_options(options: &ReadOptions) -> String {
    let mut parts = Vec::new();
    if let Some(limit) = options.limit {
        parts.push(format!("limit={limit}"));
    }
    if let Some(offset) = options.offset {
        parts.push(format!("offset={offset}"));
    }
    if let Some(order_by) = &options.order_by {
        parts.push(format!("order_by={order_by}"));
    }
    if !options.filters.is_empty() {
        parts.push(format!("filters={}", options.filters.len()));
    }
    if options.global_filter.as_deref().is_some_and(|g| !g.is_empty()) {
        parts.push("global_filter=<text>".to_string());
    }
    parts.join(" ")
}

// =============================================================================
// Decorator
// =============================================================================

/// Logging decorator over a backend.
pub struct AuditedDatabase<D> {
    inner: D,
    log: Arc<AuditLog>,
}

impl<D: DatabaseOperations> AuditedDatabase<D> {
    pub fn new(inner: D, config: &AuditConfig) -> Self {
        Self {
            inner,
            log: Arc::new(AuditLog::new(config)),
        }
    }

    /// Wraps `inner`, appending to an existing log.
    pub fn with_log(inner: D, log: Arc<AuditLog>) -> Self {
        Self { inner, log }
    }

    pub fn log(&self) -> Arc<AuditLog> {
        Arc::clone(&self.log)
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    async fn audited<T, F>(
        &self,
        operation: &'static str,
        table: Option<&str>,
        detail: String,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let started = Instant::now();
        let outcome = call.await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        let audit_outcome = match &outcome {
            Ok(_) => {
                info!(target: "litedit::audit", operation, table, %detail, elapsed_ms, "ok");
                AuditOutcome::Success
            }
            Err(e) => {
                warn!(target: "litedit::audit", operation, table, %detail, elapsed_ms, error = %e, "failed");
                AuditOutcome::Failure(e.to_string())
            }
        };

        self.log.push(AuditRecord {
            operation,
            table: table.map(str::to_string),
            detail,
            outcome: audit_outcome,
            elapsed,
        });
        outcome
    }
}

#[async_trait]
impl<D: DatabaseOperations> DatabaseOperations for AuditedDatabase<D> {
    async fn create_database(&self) -> Result<()> {
        self.audited("createDatabase", None, String::new(), self.inner.create_database())
            .await
    }

    async fn load_database(&self, image: Vec<u8>) -> Result<()> {
        let detail = format!("image=<blob:{}>", image.len());
        self.audited("loadDatabase", None, detail, self.inner.load_database(image))
            .await
    }

    async fn open_file(&self, path: &Path) -> Result<()> {
        let detail = format!("path={}", redact_path(path));
        self.audited("openFile", None, detail, self.inner.open_file(path)).await
    }

    async fn ping(&self) -> Result<bool> {
        self.audited("ping", None, String::new(), self.inner.ping()).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.audited("shutdown", None, String::new(), self.inner.shutdown()).await
    }

    async fn execute_query(&self, sql: &str, params: &[CellValue]) -> Result<Vec<ResultSet>> {
        let detail = format!("sql={:?} params={}", redact_literals(sql), params.len());
        self.audited("executeQuery", None, detail, self.inner.execute_query(sql, params))
            .await
    }

    async fn fetch_table_data(&self, table: &str, options: &ReadOptions) -> Result<ResultSet> {
        let detail = describe_options(options);
        self.audited("fetchTableData", Some(table), detail, self.inner.fetch_table_data(table, options))
            .await
    }

    async fn fetch_table_count(&self, table: &str, options: &ReadOptions) -> Result<i64> {
        let detail = describe_options(options);
        self.audited("fetchTableCount", Some(table), detail, self.inner.fetch_table_count(table, options))
            .await
    }

    async fn fetch_schema(&self) -> Result<SchemaSnapshot> {
        self.audited("fetchSchema", None, String::new(), self.inner.fetch_schema()).await
    }

    async fn get_table_info(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.audited("getTableInfo", Some(table), String::new(), self.inner.get_table_info(table))
            .await
    }

    async fn get_pragmas(&self) -> Result<BTreeMap<String, CellValue>> {
        self.audited("getPragmas", None, String::new(), self.inner.get_pragmas()).await
    }

    async fn set_pragma(&self, name: &str, value: &CellValue) -> Result<()> {
        let detail = format!("pragma={name} value={}", redact_value(value));
        self.audited("setPragma", None, detail, self.inner.set_pragma(name, value)).await
    }

    async fn update_cell(
        &self,
        table: &str,
        row_id: RecordId,
        column: &str,
        value: &CellValue,
        patch: Option<&Value>,
    ) -> Result<()> {
        let value_text = match patch {
            Some(patch) => redact_patch(patch),
            None => redact_value(value),
        };
        let detail = format!("row={row_id} column={column} value={value_text}");
        self.audited(
            "updateCell",
            Some(table),
            detail,
            self.inner.update_cell(table, row_id, column, value, patch),
        )
        .await
    }

    async fn insert_row(&self, table: &str, data: &[ColumnValue]) -> Result<Option<i64>> {
        let detail = format!("row={}", redact_row(data));
        self.audited("insertRow", Some(table), detail, self.inner.insert_row(table, data))
            .await
    }

    async fn delete_rows(&self, table: &str, row_ids: &[RecordId]) -> Result<()> {
        let detail = format!("rows={}", row_ids.len());
        self.audited("deleteRows", Some(table), detail, self.inner.delete_rows(table, row_ids))
            .await
    }

    async fn delete_columns(&self, table: &str, columns: &[String]) -> Result<()> {
        let detail = format!("columns=[{}]", columns.join(", "));
        self.audited("deleteColumns", Some(table), detail, self.inner.delete_columns(table, columns))
            .await
    }

    async fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<()> {
        let names: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.column_type))
            .collect();
        let detail = format!("columns=[{}]", names.join(", "));
        self.audited("createTable", Some(table), detail, self.inner.create_table(table, columns))
            .await
    }

    async fn update_cell_batch(&self, table: &str, updates: &[CellUpdate]) -> Result<()> {
        let patches = updates.iter().filter(|u| u.patch.is_some()).count();
        let detail = format!("cells={} patches={patches}", updates.len());
        self.audited(
            "updateCellBatch",
            Some(table),
            detail,
            self.inner.update_cell_batch(table, updates),
        )
        .await
    }

    async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: &str,
        default_value: Option<&str>,
    ) -> Result<()> {
        let default_text = match default_value {
            Some(d) => format!("<text:{}>", d.len()),
            None => "none".to_string(),
        };
        let detail = format!("column={column} type={column_type} default={default_text}");
        self.audited(
            "addColumn",
            Some(table),
            detail,
            self.inner.add_column(table, column, column_type, default_value),
        )
        .await
    }

    async fn undo_modification(&self, entry: &ModificationEntry) -> Result<()> {
        let detail = format!("kind={}", entry.modification_type().as_str());
        self.audited(
            "undoModification",
            Some(&entry.target_table),
            detail,
            self.inner.undo_modification(entry),
        )
        .await
    }

    async fn redo_modification(&self, entry: &ModificationEntry) -> Result<()> {
        let detail = format!("kind={}", entry.modification_type().as_str());
        self.audited(
            "redoModification",
            Some(&entry.target_table),
            detail,
            self.inner.redo_modification(entry),
        )
        .await
    }

    async fn serialize_database(&self) -> Result<Vec<u8>> {
        self.audited("serializeDatabase", None, String::new(), self.inner.serialize_database())
            .await
    }

    async fn write_to_file(&self, path: &Path) -> Result<()> {
        let detail = format!("path={}", redact_path(path));
        self.audited("writeToFile", None, detail, self.inner.write_to_file(path)).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RpcConfig;
    use crate::worker::WorkerDatabase;

    #[test]
    fn test_value_redaction() {
        assert_eq!(redact_value(&CellValue::Null), "<null>");
        assert_eq!(redact_value(&CellValue::Integer(42)), "<integer>");
        assert_eq!(redact_value(&CellValue::Float(1.5)), "<float>");
        assert_eq!(redact_value(&CellValue::from("secret")), "<text:6>");
        assert_eq!(redact_value(&CellValue::Blob(vec![1, 2, 3])), "<blob:3>");
        assert_eq!(
            redact_row(&[ColumnValue::new("email", "a@b.c"), ColumnValue::new("age", 30)]),
            "{email=<text:5>, age=<integer>}"
        );
    }

    #[test]
    fn test_log_is_bounded() {
        let log = AuditLog::new(&AuditConfig { capacity: 2 });
        for operation in ["ping", "fetchSchema", "shutdown"] {
            log.push(AuditRecord {
                operation,
                table: None,
                detail: String::new(),
                outcome: AuditOutcome::Success,
                elapsed: Duration::ZERO,
            });
        }
        let ops: Vec<_> = log.records().iter().map(|r| r.operation).collect();
        assert_eq!(ops, vec!["fetchSchema", "shutdown"]);
    }

    #[tokio::test]
    async fn test_calls_are_recorded_without_values() {
        let worker = WorkerDatabase::spawn(RpcConfig::default()).unwrap();
        let db = AuditedDatabase::new(worker, &AuditConfig::default());
        db.create_database().await.unwrap();
        db.execute_query("CREATE TABLE people (name TEXT)", &[]).await.unwrap();
        db.insert_row("people", &[ColumnValue::new("name", "Jane Doe")]).await.unwrap();
        db.execute_query("SELECT * FROM people WHERE name = ?", &[CellValue::from("Jane Doe")])
            .await
            .unwrap();
        let _ = db.fetch_table_data("missing", &ReadOptions::default()).await;

        let records = db.log().records();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| !r.detail.contains("Jane")));
        assert_eq!(records[2].detail, "row={name=<text:8>}");
        assert!(records[3].detail.ends_with("params=1"));

        db.execute_query("UPDATE people SET name = 'Jane Roe' WHERE rowid = 1", &[]).await.unwrap();
        let last = db.log().records().pop().unwrap();
        assert_eq!(last.detail, r#"sql="UPDATE people SET name = ? WHERE rowid = ?" params=0"#);

        let failures = db.log().failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, "fetchTableData");
    }
}
