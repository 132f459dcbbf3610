#![allow(dead_code)]

use std::path::PathBuf;

use litedit::{Backend, CellValue, DatabaseDocument, DatabaseOperations, DocumentConfig};

/// A path inside a fresh temporary directory. The file itself does not exist.
pub fn temp_path(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Document settings using the native worker process built with this crate.
pub fn native_config() -> DocumentConfig {
    DocumentConfig {
        backend: Backend::Native {
            program: PathBuf::from(env!("CARGO_BIN_EXE_litedit-worker")),
        },
        ..Default::default()
    }
}

/// Runs a query and returns the rows of its first result set.
pub async fn rows(db: &dyn DatabaseOperations, sql: &str) -> Vec<Vec<CellValue>> {
    db.execute_query(sql, &[])
        .await
        .expect("query")
        .into_iter()
        .next()
        .unwrap_or_default()
        .rows
}

pub async fn doc_rows(doc: &DatabaseDocument, sql: &str) -> Vec<Vec<CellValue>> {
    rows(doc.backend().as_ref(), sql).await
}

pub fn int(v: i64) -> CellValue {
    CellValue::Integer(v)
}

pub fn text(v: &str) -> CellValue {
    CellValue::from(v)
}
