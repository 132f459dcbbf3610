//! Undo/redo symmetry for every modification type, end to end through a
//! document and the worker backend.

mod common;

use common::{doc_rows, int, text};
use litedit::{
    CellUpdate, CellValue, ColumnDef, ColumnValue, DatabaseDocument, DocumentConfig, ModificationType,
    RecordId,
};

async fn people() -> DatabaseDocument {
    let mut doc = DatabaseDocument::create(DocumentConfig::default()).await.unwrap();
    doc.create_table(
        "people",
        &[
            ColumnDef::new("id", "INTEGER").primary_key(),
            ColumnDef::new("name", "TEXT"),
            ColumnDef::new("photo", "BLOB"),
        ],
    )
    .await
    .unwrap();
    doc
}

#[tokio::test]
async fn test_delete_undo_restores_same_rowid_and_values() {
    let mut doc = people().await;
    let ada = doc
        .insert_row("people", &[ColumnValue::new("name", "ada"), ColumnValue::new("photo", vec![1u8, 2, 3])])
        .await
        .unwrap()
        .unwrap();
    doc.insert_row("people", &[ColumnValue::new("name", "bob")]).await.unwrap();
    let before = doc_rows(&doc, "SELECT id, name, photo FROM people ORDER BY id").await;

    doc.delete_rows("people", &[RecordId::new(ada)]).await.unwrap();
    assert_eq!(doc_rows(&doc, "SELECT id FROM people").await, vec![vec![int(2)]]);

    let undone = doc.undo().await.unwrap().unwrap();
    assert_eq!(undone.modification_type(), ModificationType::RowDelete);
    assert_eq!(doc_rows(&doc, "SELECT id, name, photo FROM people ORDER BY id").await, before);

    doc.redo().await.unwrap().unwrap();
    assert_eq!(doc_rows(&doc, "SELECT id FROM people").await, vec![vec![int(2)]]);
}

#[tokio::test]
async fn test_insert_undo_redo_keeps_rowid() {
    let mut doc = people().await;
    doc.insert_row("people", &[ColumnValue::new("name", "ada")]).await.unwrap();

    doc.undo().await.unwrap();
    assert!(doc_rows(&doc, "SELECT * FROM people").await.is_empty());

    doc.redo().await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT id, name FROM people").await,
        vec![vec![int(1), text("ada")]]
    );
}

#[tokio::test]
async fn test_table_without_alias_keeps_rowid() {
    let mut doc = DatabaseDocument::create(DocumentConfig::default()).await.unwrap();
    doc.create_table("notes", &[ColumnDef::new("body", "TEXT")]).await.unwrap();
    for body in ["a", "b", "c"] {
        doc.insert_row("notes", &[ColumnValue::new("body", body)]).await.unwrap();
    }

    doc.delete_rows("notes", &[RecordId::new(2)]).await.unwrap();
    doc.undo().await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT rowid, body FROM notes ORDER BY rowid").await,
        vec![vec![int(1), text("a")], vec![int(2), text("b")], vec![int(3), text("c")]]
    );
}

#[tokio::test]
async fn test_column_drop_undo_restores_every_value() {
    let mut doc = DatabaseDocument::create(DocumentConfig::default()).await.unwrap();
    doc.create_table(
        "t",
        &[
            ColumnDef::new("id", "INTEGER").primary_key(),
            ColumnDef::new("keep", "TEXT"),
            ColumnDef::new("gone", "INTEGER"),
        ],
    )
    .await
    .unwrap();
    doc.backend()
        .execute_query("INSERT INTO t VALUES (1, 'a', 10), (2, 'b', NULL), (3, 'c', 30)", &[])
        .await
        .unwrap();

    doc.delete_columns("t", &["gone".to_string()]).await.unwrap();
    let columns = doc.backend().get_table_info("t").await.unwrap();
    assert!(columns.iter().all(|c| c.name != "gone"));

    doc.undo().await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT id, gone FROM t ORDER BY id").await,
        vec![vec![int(1), int(10)], vec![int(2), CellValue::Null], vec![int(3), int(30)]]
    );

    doc.redo().await.unwrap();
    let columns = doc.backend().get_table_info("t").await.unwrap();
    assert_eq!(columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["id", "keep"]);
}

#[tokio::test]
async fn test_table_drop_and_create_undo() {
    let mut doc = people().await;
    doc.insert_row("people", &[ColumnValue::new("name", "ada")]).await.unwrap();

    doc.drop_table("people").await.unwrap();
    assert!(doc.backend().fetch_schema().await.unwrap().tables.is_empty());

    doc.undo().await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT id, name FROM people").await,
        vec![vec![int(1), text("ada")]]
    );

    doc.redo().await.unwrap();
    assert!(doc.backend().fetch_schema().await.unwrap().tables.is_empty());

    // back past the drop and the insert to the create
    doc.undo().await.unwrap();
    doc.undo().await.unwrap();
    doc.undo().await.unwrap();
    assert!(doc.backend().fetch_schema().await.unwrap().tables.is_empty());
    assert!(!doc.tracker().can_undo());
}

#[tokio::test]
async fn test_cell_edits_and_add_column() {
    let mut doc = people().await;
    doc.insert_row("people", &[ColumnValue::new("name", "ada")]).await.unwrap();
    doc.insert_row("people", &[ColumnValue::new("name", "bob")]).await.unwrap();

    doc.update_cell("people", RecordId::new(1), "name", text("Ada")).await.unwrap();
    doc.update_cell_batch(
        "people",
        &[CellUpdate::set(1i64, "name", "A."), CellUpdate::set(2i64, "name", "B.")],
        None,
    )
    .await
    .unwrap();
    doc.add_column("people", "age", "INTEGER", Some("0")).await.unwrap();

    doc.undo().await.unwrap();
    assert!(doc.backend().get_table_info("people").await.unwrap().iter().all(|c| c.name != "age"));

    doc.undo().await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT name FROM people ORDER BY id").await,
        vec![vec![text("Ada")], vec![text("bob")]]
    );

    doc.undo().await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT name FROM people ORDER BY id").await,
        vec![vec![text("ada")], vec![text("bob")]]
    );

    doc.redo().await.unwrap();
    doc.redo().await.unwrap();
    doc.redo().await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT name, age FROM people ORDER BY id").await,
        vec![vec![text("A."), int(0)], vec![text("B."), int(0)]]
    );
}

#[tokio::test]
async fn test_new_edit_discards_redo() {
    let mut doc = people().await;
    doc.insert_row("people", &[ColumnValue::new("name", "ada")]).await.unwrap();
    doc.undo().await.unwrap();
    assert!(doc.tracker().can_redo());

    doc.insert_row("people", &[ColumnValue::new("name", "eve")]).await.unwrap();
    assert!(!doc.tracker().can_redo());
    assert!(doc.redo().await.unwrap().is_none());
}

#[tokio::test]
async fn test_rowid_zero_is_recorded() {
    let mut doc = people().await;
    let id = doc
        .insert_row("people", &[ColumnValue::new("id", 0), ColumnValue::new("name", "zero")])
        .await
        .unwrap();
    assert_eq!(id, Some(0));
    assert_eq!(doc.tracker().timeline().len(), 2);

    doc.undo().await.unwrap().unwrap();
    assert!(doc_rows(&doc, "SELECT * FROM people").await.is_empty());

    doc.redo().await.unwrap().unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT id, name FROM people").await,
        vec![vec![int(0), text("zero")]]
    );
}

#[tokio::test]
async fn test_refused_column_drop_changes_nothing() {
    let mut doc = DatabaseDocument::create(DocumentConfig::default()).await.unwrap();
    doc.backend()
        .execute_query("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT, b TEXT UNIQUE)", &[])
        .await
        .unwrap();

    let result = doc.delete_columns("t", &["a".to_string(), "b".to_string()]).await;
    assert!(result.is_err());

    let columns = doc.backend().get_table_info("t").await.unwrap();
    assert_eq!(columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["id", "a", "b"]);
    assert!(doc.tracker().timeline().is_empty());
}

#[tokio::test]
async fn test_json_cell_edit_keeps_key_order() {
    let mut doc = people().await;
    doc.insert_row("people", &[ColumnValue::new("name", "{\"b\":1,\"a\":2}")]).await.unwrap();

    doc.update_cell("people", RecordId::new(1), "name", text("{\"b\":1,\"a\":3}")).await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT name FROM people").await,
        vec![vec![text("{\"b\":1,\"a\":3}")]]
    );

    doc.undo().await.unwrap();
    assert_eq!(
        doc_rows(&doc, "SELECT name FROM people").await,
        vec![vec![text("{\"b\":1,\"a\":2}")]]
    );
}
