//! The out-of-process backend: the `litedit-worker` binary driven over
//! stdin/stdout frames.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::{doc_rows, int, native_config, rows, temp_path, text};
use litedit::{
    ColumnDef, ColumnValue, DatabaseDocument, DatabaseOperations, DocumentConfig, NativeDatabase, RpcConfig,
};

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

fn worker_program() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_litedit-worker"))
}

#[tokio::test]
async fn test_native_document_saves_a_real_file() {
    let (_dir, path) = temp_path("native.db");

    let mut doc = DatabaseDocument::open(&path, native_config()).await.unwrap();
    doc.create_table("t", &[ColumnDef::new("id", "INTEGER").primary_key(), ColumnDef::new("v", "TEXT")])
        .await
        .unwrap();
    doc.insert_row("t", &[ColumnValue::new("v", "from native")]).await.unwrap();
    doc.save().await.unwrap();
    doc.close().await.unwrap();

    let on_disk = std::fs::read(&path).unwrap();
    assert!(on_disk.starts_with(SQLITE_MAGIC));

    // the in-process backend reads the same file
    let reopened = DatabaseDocument::open(&path, DocumentConfig::default()).await.unwrap();
    assert_eq!(
        doc_rows(&reopened, "SELECT id, v FROM t").await,
        vec![vec![int(1), text("from native")]]
    );
}

#[tokio::test]
async fn test_native_document_undo_redo() {
    let mut doc = DatabaseDocument::create(native_config()).await.unwrap();
    doc.create_table("t", &[ColumnDef::new("v", "INTEGER")]).await.unwrap();
    doc.insert_row("t", &[ColumnValue::new("v", 1)]).await.unwrap();

    doc.undo().await.unwrap();
    assert!(doc_rows(&doc, "SELECT * FROM t").await.is_empty());
    doc.redo().await.unwrap();
    assert_eq!(doc_rows(&doc, "SELECT rowid, v FROM t").await, vec![vec![int(1), int(1)]]);
}

#[tokio::test]
async fn test_serialized_image_has_sqlite_header() {
    let db = NativeDatabase::spawn(&worker_program(), RpcConfig::default(), Duration::from_secs(5)).unwrap();
    assert!(db.health_check().await);
    db.create_database().await.unwrap();
    db.execute_query("CREATE TABLE t (v); INSERT INTO t VALUES (42)", &[]).await.unwrap();

    let image = db.serialize_database().await.unwrap();
    assert!(image.starts_with(SQLITE_MAGIC));
    assert_eq!(rows(&db, "SELECT v FROM t").await, vec![vec![int(42)]]);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_killed_worker_fails_calls() {
    let db = NativeDatabase::spawn(&worker_program(), RpcConfig::default(), Duration::from_secs(5)).unwrap();
    assert!(db.health_check().await);
    assert!(db.pid().await.is_some());

    db.kill().await.unwrap();
    assert!(db.execute_query("SELECT 1", &[]).await.is_err());
    assert!(!db.health_check().await);
}

#[tokio::test]
async fn test_missing_program_fails_to_spawn() {
    let (_dir, path) = temp_path("no-such-worker");
    assert!(NativeDatabase::spawn(&path, RpcConfig::default(), Duration::from_secs(1)).is_err());
}
