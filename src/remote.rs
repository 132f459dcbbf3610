//! # Engine over RPC
//!
//! Both sides of the engine's method table live here:
//!
//! - [`engine_handler`] builds the [`RpcHandler`] that runs next to a
//!   [`SqliteEngine`] (on the worker thread, or in the `litedit-worker`
//!   process).
//! - [`RemoteDatabase`] implements [`DatabaseOperations`] by calling those
//!   methods through an [`RpcProxy`].
//!
//! Method names are camelCase on the wire and listed in [`ENGINE_METHODS`].
//! Database images travel as [`Transfer`] buffers in both directions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::engine::SqliteEngine;
use crate::error::{Error, Result};
use crate::modification::ModificationEntry;
use crate::operations::DatabaseOperations;
use crate::query::ReadOptions;
use crate::rpc::{Arg, Args, Payload, RpcHandler, RpcProxy, Transfer};
use crate::types::{
    CellUpdate, CellValue, ColumnDef, ColumnInfo, ColumnValue, RecordId, ResultSet, SchemaSnapshot,
};

/// Every method the engine exposes.
pub const ENGINE_METHODS: &[&str] = &[
    "addColumn",
    "createDatabase",
    "createTable",
    "deleteColumns",
    "deleteRows",
    "executeQuery",
    "fetchSchema",
    "fetchTableCount",
    "fetchTableData",
    "getPragmas",
    "getTableInfo",
    "insertRow",
    "loadDatabase",
    "openFile",
    "ping",
    "redoModification",
    "serializeDatabase",
    "setPragma",
    "shutdown",
    "undoModification",
    "updateCell",
    "updateCellBatch",
    "writeToFile",
];

// =============================================================================
// Handler Side
// =============================================================================

fn unit(result: Result<()>) -> Result<Payload> {
    result.map(|()| Payload::unit())
}

/// Builds the method table served next to an engine.
pub fn engine_handler() -> RpcHandler<SqliteEngine> {
    RpcHandler::<SqliteEngine>::new()
        // lifecycle
        .register("createDatabase", |engine, _| unit(engine.create_database()))
        .register("loadDatabase", |engine, mut args| {
            let image = args.take_bytes(0)?;
            unit(engine.load_database(&image))
        })
        .register("openFile", |engine, args| {
            let path: PathBuf = args.get(0)?;
            unit(engine.open_file(&path))
        })
        .register("ping", |engine, _| Payload::json(&engine.ping()))
        .register("shutdown", |engine, _| unit(engine.shutdown()))
        // queries
        .register("executeQuery", |engine, args| {
            let sql = args.text(0)?;
            let params: Vec<CellValue> = args.optional(1)?.unwrap_or_default();
            Payload::json(&engine.execute_query(&sql, &params)?)
        })
        .register("fetchTableData", |engine, args| {
            let options: ReadOptions = args.optional(1)?.unwrap_or_default();
            Payload::json(&engine.fetch_table_data(&args.text(0)?, &options)?)
        })
        .register("fetchTableCount", |engine, args| {
            let options: ReadOptions = args.optional(1)?.unwrap_or_default();
            Payload::json(&engine.fetch_table_count(&args.text(0)?, &options)?)
        })
        .register("fetchSchema", |engine, _| Payload::json(&engine.fetch_schema()?))
        .register("getTableInfo", |engine, args| {
            Payload::json(&engine.get_table_info(&args.text(0)?)?)
        })
        .register("getPragmas", |engine, _| Payload::json(&engine.get_pragmas()?))
        .register("setPragma", |engine, args| {
            let value: CellValue = args.get(1)?;
            unit(engine.set_pragma(&args.text(0)?, &value))
        })
        // mutations
        .register("updateCell", |engine, args| {
            let row_id = args.row_id(1)?;
            let value: CellValue = args.optional(3)?.unwrap_or_default();
            let patch: Option<Value> = args.optional(4)?;
            unit(engine.update_cell(&args.text(0)?, row_id, &args.text(2)?, &value, patch.as_ref()))
        })
        .register("insertRow", |engine, args| {
            let data: Vec<ColumnValue> = args.optional(1)?.unwrap_or_default();
            Payload::json(&engine.insert_row(&args.text(0)?, &data)?)
        })
        .register("deleteRows", |engine, args| {
            let row_ids = args.row_ids(1)?;
            unit(engine.delete_rows(&args.text(0)?, &row_ids))
        })
        .register("deleteColumns", |engine, args| {
            let columns: Vec<String> = args.get(1)?;
            unit(engine.delete_columns(&args.text(0)?, &columns))
        })
        .register("createTable", |engine, args| {
            let columns = column_defs(&args, 1)?;
            unit(engine.create_table(&args.text(0)?, &columns))
        })
        .register("updateCellBatch", |engine, args| {
            let updates: Vec<CellUpdate> = args.get(1)?;
            unit(engine.update_cell_batch(&args.text(0)?, &updates))
        })
        .register("addColumn", |engine, args| {
            let default_value: Option<String> = args.optional(3)?;
            unit(engine.add_column(
                &args.text(0)?,
                &args.text(1)?,
                &args.text(2)?,
                default_value.as_deref(),
            ))
        })
        // history
        .register("undoModification", |engine, args| {
            let entry: ModificationEntry = args.get(0)?;
            unit(engine.undo_modification(&entry))
        })
        .register("redoModification", |engine, args| {
            let entry: ModificationEntry = args.get(0)?;
            unit(engine.redo_modification(&entry))
        })
        // export
        .register("serializeDatabase", |engine, _| {
            Ok(Payload::transfer(engine.serialize_database()?))
        })
        .register("writeToFile", |engine, args| {
            let path: PathBuf = args.get(0)?;
            unit(engine.write_to_file(&path))
        })
}

/// Column definitions must be structured objects; bare `"name TYPE"`
/// strings would end up in DDL verbatim.
fn column_defs(args: &Args, index: usize) -> Result<Vec<ColumnDef>> {
    if let Value::Array(items) = args.raw(index)? {
        if items.iter().any(Value::is_string) {
            return Err(Error::Validation(
                "column definitions must be objects with name and type, not strings".to_string(),
            ));
        }
    }
    args.get(index)
}

// =============================================================================
// Caller Side
// =============================================================================

/// [`DatabaseOperations`] backed by an engine on the other end of a proxy.
pub struct RemoteDatabase {
    proxy: RpcProxy,
}

impl RemoteDatabase {
    pub fn new(proxy: RpcProxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &RpcProxy {
        &self.proxy
    }

    async fn invoke<T: DeserializeOwned>(&self, method: &str, args: Vec<Arg>) -> Result<T> {
        self.proxy.call(method, args).await?.decode()
    }
}

fn arg<T: serde::Serialize + ?Sized>(value: &T) -> Result<Arg> {
    Arg::json(value)
}

fn path_arg(path: &Path) -> Result<Arg> {
    let text = path
        .to_str()
        .ok_or_else(|| Error::Validation(format!("path is not valid UTF-8: {}", path.display())))?;
    arg(text)
}

#[async_trait]
impl DatabaseOperations for RemoteDatabase {
    async fn create_database(&self) -> Result<()> {
        self.invoke("createDatabase", vec![]).await
    }

    async fn load_database(&self, image: Vec<u8>) -> Result<()> {
        self.invoke("loadDatabase", vec![Transfer(image).into()]).await
    }

    async fn open_file(&self, path: &Path) -> Result<()> {
        self.invoke("openFile", vec![path_arg(path)?]).await
    }

    async fn ping(&self) -> Result<bool> {
        self.invoke("ping", vec![]).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.invoke("shutdown", vec![]).await
    }

    async fn execute_query(&self, sql: &str, params: &[CellValue]) -> Result<Vec<ResultSet>> {
        self.invoke("executeQuery", vec![arg(sql)?, arg(params)?]).await
    }

    async fn fetch_table_data(&self, table: &str, options: &ReadOptions) -> Result<ResultSet> {
        self.invoke("fetchTableData", vec![arg(table)?, arg(options)?]).await
    }

    async fn fetch_table_count(&self, table: &str, options: &ReadOptions) -> Result<i64> {
        self.invoke("fetchTableCount", vec![arg(table)?, arg(options)?]).await
    }

    async fn fetch_schema(&self) -> Result<SchemaSnapshot> {
        self.invoke("fetchSchema", vec![]).await
    }

    async fn get_table_info(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.invoke("getTableInfo", vec![arg(table)?]).await
    }

    async fn get_pragmas(&self) -> Result<BTreeMap<String, CellValue>> {
        self.invoke("getPragmas", vec![]).await
    }

    async fn set_pragma(&self, name: &str, value: &CellValue) -> Result<()> {
        self.invoke("setPragma", vec![arg(name)?, arg(value)?]).await
    }

    async fn update_cell(
        &self,
        table: &str,
        row_id: RecordId,
        column: &str,
        value: &CellValue,
        patch: Option<&Value>,
    ) -> Result<()> {
        let args = vec![arg(table)?, arg(&row_id)?, arg(column)?, arg(value)?, arg(&patch)?];
        self.invoke("updateCell", args).await
    }

    async fn insert_row(&self, table: &str, data: &[ColumnValue]) -> Result<Option<i64>> {
        self.invoke("insertRow", vec![arg(table)?, arg(data)?]).await
    }

    async fn delete_rows(&self, table: &str, row_ids: &[RecordId]) -> Result<()> {
        self.invoke("deleteRows", vec![arg(table)?, arg(row_ids)?]).await
    }

    async fn delete_columns(&self, table: &str, columns: &[String]) -> Result<()> {
        self.invoke("deleteColumns", vec![arg(table)?, arg(columns)?]).await
    }

    async fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<()> {
        self.invoke("createTable", vec![arg(table)?, arg(columns)?]).await
    }

    async fn update_cell_batch(&self, table: &str, updates: &[CellUpdate]) -> Result<()> {
        self.invoke("updateCellBatch", vec![arg(table)?, arg(updates)?]).await
    }

    async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: &str,
        default_value: Option<&str>,
    ) -> Result<()> {
        let args = vec![arg(table)?, arg(column)?, arg(column_type)?, arg(&default_value)?];
        self.invoke("addColumn", args).await
    }

    async fn undo_modification(&self, entry: &ModificationEntry) -> Result<()> {
        self.invoke("undoModification", vec![arg(entry)?]).await
    }

    async fn redo_modification(&self, entry: &ModificationEntry) -> Result<()> {
        self.invoke("redoModification", vec![arg(entry)?]).await
    }

    async fn serialize_database(&self) -> Result<Vec<u8>> {
        self.proxy.call("serializeDatabase", vec![]).await?.into_bytes()
    }

    async fn write_to_file(&self, path: &Path) -> Result<()> {
        self.invoke("writeToFile", vec![path_arg(path)?]).await
    }
}

// =============================================================================
// Forwarding
// =============================================================================

/// Implements [`DatabaseOperations`] for a wrapper by forwarding every call to
/// one of its fields.
///
/// Backends that own a [`RemoteDatabase`] plus some lifecycle state (a thread,
/// a child process) use this to expose the contract without restating it.
macro_rules! forward_operations {
    ($ty:ty, $field:ident) => {
        #[async_trait::async_trait]
        impl $crate::operations::DatabaseOperations for $ty {
            async fn create_database(&self) -> $crate::Result<()> {
                self.$field.create_database().await
            }

            async fn load_database(&self, image: Vec<u8>) -> $crate::Result<()> {
                self.$field.load_database(image).await
            }

            async fn open_file(&self, path: &std::path::Path) -> $crate::Result<()> {
                self.$field.open_file(path).await
            }

            async fn ping(&self) -> $crate::Result<bool> {
                self.$field.ping().await
            }

            async fn shutdown(&self) -> $crate::Result<()> {
                self.$field.shutdown().await
            }

            async fn execute_query(
                &self,
                sql: &str,
                params: &[$crate::CellValue],
            ) -> $crate::Result<Vec<$crate::ResultSet>> {
                self.$field.execute_query(sql, params).await
            }

            async fn fetch_table_data(
                &self,
                table: &str,
                options: &$crate::ReadOptions,
            ) -> $crate::Result<$crate::ResultSet> {
                self.$field.fetch_table_data(table, options).await
            }

            async fn fetch_table_count(
                &self,
                table: &str,
                options: &$crate::ReadOptions,
            ) -> $crate::Result<i64> {
                self.$field.fetch_table_count(table, options).await
            }

            async fn fetch_schema(&self) -> $crate::Result<$crate::SchemaSnapshot> {
                self.$field.fetch_schema().await
            }

            async fn get_table_info(&self, table: &str) -> $crate::Result<Vec<$crate::ColumnInfo>> {
                self.$field.get_table_info(table).await
            }

            async fn get_pragmas(
                &self,
            ) -> $crate::Result<std::collections::BTreeMap<String, $crate::CellValue>> {
                self.$field.get_pragmas().await
            }

            async fn set_pragma(&self, name: &str, value: &$crate::CellValue) -> $crate::Result<()> {
                self.$field.set_pragma(name, value).await
            }

            async fn update_cell(
                &self,
                table: &str,
                row_id: $crate::RecordId,
                column: &str,
                value: &$crate::CellValue,
                patch: Option<&serde_json::Value>,
            ) -> $crate::Result<()> {
                self.$field.update_cell(table, row_id, column, value, patch).await
            }

            async fn insert_row(
                &self,
                table: &str,
                data: &[$crate::ColumnValue],
            ) -> $crate::Result<Option<i64>> {
                self.$field.insert_row(table, data).await
            }

            async fn delete_rows(&self, table: &str, row_ids: &[$crate::RecordId]) -> $crate::Result<()> {
                self.$field.delete_rows(table, row_ids).await
            }

            async fn delete_columns(&self, table: &str, columns: &[String]) -> $crate::Result<()> {
                self.$field.delete_columns(table, columns).await
            }

            async fn create_table(&self, table: &str, columns: &[$crate::ColumnDef]) -> $crate::Result<()> {
                self.$field.create_table(table, columns).await
            }

            async fn update_cell_batch(
                &self,
                table: &str,
                updates: &[$crate::CellUpdate],
            ) -> $crate::Result<()> {
                self.$field.update_cell_batch(table, updates).await
            }

            async fn add_column(
                &self,
                table: &str,
                column: &str,
                column_type: &str,
                default_value: Option<&str>,
            ) -> $crate::Result<()> {
                self.$field.add_column(table, column, column_type, default_value).await
            }

            async fn undo_modification(&self, entry: &$crate::ModificationEntry) -> $crate::Result<()> {
                self.$field.undo_modification(entry).await
            }

            async fn redo_modification(&self, entry: &$crate::ModificationEntry) -> $crate::Result<()> {
                self.$field.redo_modification(entry).await
            }

            async fn serialize_database(&self) -> $crate::Result<Vec<u8>> {
                self.$field.serialize_database().await
            }

            async fn write_to_file(&self, path: &std::path::Path) -> $crate::Result<()> {
                self.$field.write_to_file(path).await
            }
        }
    };
}

pub(crate) use forward_operations;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Envelope, Message};
    use serde_json::json;

    #[test]
    fn test_method_list_matches_handler() {
        assert_eq!(engine_handler().method_names(), ENGINE_METHODS.to_vec());
    }

    fn call(handler: &RpcHandler<SqliteEngine>, engine: &mut SqliteEngine, method: &str, parameters: Vec<Value>) -> Envelope {
        let message = Message::new(
            &Envelope::Invoke {
                correlation_id: "t-1".into(),
                method_name: method.into(),
                parameters,
            },
            vec![],
        )
        .unwrap();
        handler.handle(engine, message).unwrap().decode().unwrap().0
    }

    fn error_text(envelope: Envelope) -> String {
        match envelope {
            Envelope::Result { error_text: Some(text), .. } => text,
            other => panic!("expected an error result, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_string_columns_rejected() {
        let handler = engine_handler();
        let mut engine = SqliteEngine::new();
        engine.create_database().unwrap();

        let text = error_text(call(&handler, &mut engine, "createTable", vec![json!("t"), json!(["id INTEGER"])]));
        assert!(text.starts_with("invalid input"));
        assert!(engine.fetch_schema().unwrap().tables.is_empty());
    }

    #[test]
    fn test_invalid_row_id_rejected_before_sql() {
        let handler = engine_handler();
        let mut engine = SqliteEngine::new();
        engine.create_database().unwrap();
        engine.execute_query("CREATE TABLE t (v); INSERT INTO t VALUES (1)", &[]).unwrap();

        let text = error_text(call(&handler, &mut engine, "deleteRows", vec![json!("t"), json!([1, "nope"])]));
        assert!(text.starts_with("invalid row id"));
        assert_eq!(engine.fetch_table_count("t", &ReadOptions::default()).unwrap(), 1);
    }

    #[test]
    fn test_calls_before_open_report_not_initialized() {
        let handler = engine_handler();
        let mut engine = SqliteEngine::new();
        let text = error_text(call(&handler, &mut engine, "fetchSchema", vec![]));
        assert_eq!(text, "database not initialized");
    }
}
