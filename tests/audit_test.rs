//! What a document's audit log keeps, and what it must never keep.

mod common;

use common::temp_path;
use litedit::{
    AuditOutcome, CellUpdate, ColumnDef, ColumnValue, DatabaseDocument, DocumentConfig, RecordId,
};
use serde_json::json;

const SECRET: &str = "hunter2-correct-horse";

#[tokio::test]
async fn test_document_log_never_holds_cell_values() {
    let (_dir, path) = temp_path("secrets.db");
    let mut doc = DatabaseDocument::open(&path, DocumentConfig::default()).await.unwrap();

    doc.create_table("vault", &[ColumnDef::new("id", "INTEGER").primary_key(), ColumnDef::new("secret", "TEXT")])
        .await
        .unwrap();
    doc.insert_row("vault", &[ColumnValue::new("secret", SECRET)]).await.unwrap();
    doc.update_cell("vault", RecordId::new(1), "secret", format!("{{\"pw\":\"{SECRET}\"}}").into())
        .await
        .unwrap();
    doc.update_cell_batch(
        "vault",
        &[CellUpdate::json_patch(1i64, "secret", json!({ "hint": SECRET }))],
        None,
    )
    .await
    .unwrap();
    doc.delete_rows("vault", &[RecordId::new(1)]).await.unwrap();
    doc.undo().await.unwrap();
    doc.save().await.unwrap();

    let records = doc.audit_log().records();
    assert!(!records.is_empty());
    let dir_name = path.parent().unwrap().to_string_lossy().to_string();
    for record in &records {
        assert!(!record.detail.contains(SECRET), "{}: {}", record.operation, record.detail);
        assert!(!record.detail.contains(&dir_name), "{}: {}", record.operation, record.detail);
    }

    let operations: Vec<&str> = records.iter().map(|r| r.operation).collect();
    for expected in ["createTable", "insertRow", "updateCell", "updateCellBatch", "deleteRows", "undoModification"] {
        assert!(operations.contains(&expected), "missing {expected} in {operations:?}");
    }
}

#[tokio::test]
async fn test_failures_are_logged_with_their_error() {
    let mut doc = DatabaseDocument::create(DocumentConfig::default()).await.unwrap();
    assert!(doc.insert_row("nowhere", &[ColumnValue::new("v", 1)]).await.is_err());

    let failures = doc.audit_log().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].operation, "insertRow");
    assert_eq!(failures[0].table.as_deref(), Some("nowhere"));
    match &failures[0].outcome {
        AuditOutcome::Failure(text) => assert!(text.starts_with("Query failed: "), "{text}"),
        AuditOutcome::Success => unreachable!(),
    }
}

#[tokio::test]
async fn test_raw_sql_literals_stay_out_of_the_log() {
    let mut doc = DatabaseDocument::create(DocumentConfig::default()).await.unwrap();
    doc.create_table("vault", &[ColumnDef::new("secret", "TEXT")]).await.unwrap();
    doc.backend()
        .execute_query(&format!("INSERT INTO vault VALUES ('{SECRET}'), (x'cafe'), (31337)"), &[])
        .await
        .unwrap();
    doc.backend()
        .execute_query(&format!("SELECT * FROM vault WHERE secret = '{SECRET}' -- {SECRET}"), &[])
        .await
        .unwrap();

    let queries: Vec<String> = doc
        .audit_log()
        .records()
        .into_iter()
        .filter(|r| r.operation == "executeQuery")
        .map(|r| r.detail)
        .collect();
    assert!(queries.len() >= 2);
    for detail in &queries {
        assert!(!detail.contains(SECRET), "{detail}");
        assert!(!detail.contains("cafe"), "{detail}");
        assert!(!detail.contains("31337"), "{detail}");
    }
    assert!(queries.iter().any(|d| d.contains("INSERT INTO vault VALUES (?), (?), (?)")));
}
