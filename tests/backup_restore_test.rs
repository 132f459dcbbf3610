//! Hot-exit backup: a document reopened from its file plus a backup ends up
//! with the same data and history as the one that was backed up.

mod common;

use common::{doc_rows, int, temp_path, text};
use litedit::{
    AbortSignal, ColumnDef, ColumnValue, DatabaseDocument, DocumentConfig, Error, RecordId,
};

async fn saved_people(path: &std::path::Path) -> DatabaseDocument {
    let mut doc = DatabaseDocument::open(path, DocumentConfig::default()).await.unwrap();
    doc.create_table(
        "people",
        &[ColumnDef::new("id", "INTEGER").primary_key(), ColumnDef::new("name", "TEXT"), ColumnDef::new("photo", "BLOB")],
    )
    .await
    .unwrap();
    doc.insert_row("people", &[ColumnValue::new("name", "ada")]).await.unwrap();
    doc.save().await.unwrap();
    assert!(!doc.is_dirty());
    doc
}

#[tokio::test]
async fn test_restore_replays_unsaved_edits() {
    let (_dir, path) = temp_path("people.db");
    let mut doc = saved_people(&path).await;

    doc.insert_row("people", &[ColumnValue::new("name", "bob"), ColumnValue::new("photo", vec![0u8, 255, 7])])
        .await
        .unwrap();
    doc.update_cell("people", RecordId::new(1), "name", text("Ada")).await.unwrap();
    let expected = doc_rows(&doc, "SELECT id, name, photo FROM people ORDER BY id").await;
    let backup = doc.backup().unwrap();
    // simulate the editor going away without saving
    doc.close().await.unwrap();

    let mut restored = DatabaseDocument::restore_backup(&path, &backup, DocumentConfig::default(), None)
        .await
        .unwrap();
    assert_eq!(doc_rows(&restored, "SELECT id, name, photo FROM people ORDER BY id").await, expected);
    assert_eq!(restored.tracker().timeline().len(), 4);
    assert_eq!(restored.tracker().checkpoint_index(), 2);
    assert!(restored.is_dirty());

    // the restored history is live
    restored.undo().await.unwrap();
    assert_eq!(
        doc_rows(&restored, "SELECT name FROM people WHERE id = 1").await,
        vec![vec![text("ada")]]
    );
}

#[tokio::test]
async fn test_restore_unwinds_undo_past_save() {
    let (_dir, path) = temp_path("people.db");
    let mut doc = saved_people(&path).await;

    doc.undo().await.unwrap();
    assert!(doc.is_dirty());
    let backup = doc.backup().unwrap();
    doc.close().await.unwrap();

    let mut restored = DatabaseDocument::restore_backup(&path, &backup, DocumentConfig::default(), None)
        .await
        .unwrap();
    assert!(doc_rows(&restored, "SELECT * FROM people").await.is_empty());
    assert!(restored.is_dirty());

    restored.revert(None).await.unwrap();
    assert_eq!(
        doc_rows(&restored, "SELECT id, name FROM people").await,
        vec![vec![int(1), text("ada")]]
    );
    assert!(!restored.is_dirty());
    assert_eq!(restored.tracker().timeline().len(), 2);
}

#[tokio::test]
async fn test_revert_keeps_discarded_edits_redoable() {
    let (_dir, path) = temp_path("people.db");
    let mut doc = saved_people(&path).await;

    doc.delete_rows("people", &[RecordId::new(1)]).await.unwrap();
    doc.revert(None).await.unwrap();
    assert_eq!(doc_rows(&doc, "SELECT count(*) FROM people").await, vec![vec![int(1)]]);
    assert!(!doc.is_dirty());

    doc.redo().await.unwrap();
    assert_eq!(doc_rows(&doc, "SELECT count(*) FROM people").await, vec![vec![int(0)]]);
    assert!(doc.is_dirty());
}

#[tokio::test]
async fn test_undecodable_backup_is_rejected() {
    let (_dir, path) = temp_path("people.db");
    saved_people(&path).await.close().await.unwrap();

    for bad in [&b"not json"[..], br#"{"timeline":[],"checkpointIndex":3}"#] {
        let result = DatabaseDocument::restore_backup(&path, bad, DocumentConfig::default(), None).await;
        assert!(matches!(result, Err(Error::Backup(_))));
    }
}

#[tokio::test]
async fn test_aborted_restore_stops_before_replay() {
    let (_dir, path) = temp_path("people.db");
    let mut doc = saved_people(&path).await;
    doc.insert_row("people", &[ColumnValue::new("name", "bob")]).await.unwrap();
    let backup = doc.backup().unwrap();
    doc.close().await.unwrap();

    let signal = AbortSignal::new();
    signal.abort();
    let result = DatabaseDocument::restore_backup(&path, &backup, DocumentConfig::default(), Some(&signal)).await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_history_capacity_is_enforced() {
    let config = DocumentConfig {
        max_history: 3,
        ..Default::default()
    };
    let mut doc = DatabaseDocument::create(config).await.unwrap();
    doc.create_table("t", &[ColumnDef::new("v", "INTEGER")]).await.unwrap();
    for v in 0..5 {
        doc.insert_row("t", &[ColumnValue::new("v", v)]).await.unwrap();
    }
    assert_eq!(doc.tracker().timeline().len(), 3);

    while doc.tracker().can_undo() {
        doc.undo().await.unwrap();
    }
    // the table and the first two rows are past the horizon
    assert_eq!(
        doc_rows(&doc, "SELECT v FROM t ORDER BY v").await,
        vec![vec![int(0)], vec![int(1)]]
    );
}
