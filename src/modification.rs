//! # Modification Records
//!
//! A [`ModificationEntry`] is the unit of undo and redo. Each entry carries
//! everything needed to reverse AND replay itself without asking the
//! database what things used to look like, because by the time an entry is
//! undone the database may have moved on.
//!
//! ## What Each Type Captures
//!
//! | Type | Payload | Undo | Redo |
//! |------|---------|------|------|
//! | `cell_update` | prior + new value per cell | write prior | write new |
//! | `row_insert` | full rows incl. rowid | delete by rowid | reinsert with same rowid |
//! | `row_delete` | full rows incl. rowid | reinsert with same rowid | delete by rowid |
//! | `table_create` | column definitions | `DROP TABLE` | `CREATE TABLE` |
//! | `column_add` | name, type, default | `DROP COLUMN` | `ADD COLUMN` |
//! | `column_drop` | name, type, every (rowid, value) | `ADD COLUMN` + restore values | `DROP COLUMN` |
//! | `table_drop` | original DDL + all rows | rerun DDL + reinsert | `DROP TABLE` |
//!
//! ## Wire Shape
//!
//! Entries serialize as flat JSON objects tagged by `modificationType`:
//!
//! ```json
//! { "modificationType": "cell_update", "targetTable": "users",
//!   "targetColumn": "name", "targetRowId": 3,
//!   "cells": [{ "rowId": 3, "column": "name", "priorValue": "a", "newValue": "b" }] }
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{CellValue, ColumnDef, ColumnValue};

/// The kind of change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationType {
    CellUpdate,
    RowInsert,
    RowDelete,
    TableCreate,
    ColumnAdd,
    ColumnDrop,
    TableDrop,
}

impl ModificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ModificationType::CellUpdate => "cell_update",
            ModificationType::RowInsert => "row_insert",
            ModificationType::RowDelete => "row_delete",
            ModificationType::TableCreate => "table_create",
            ModificationType::ColumnAdd => "column_add",
            ModificationType::ColumnDrop => "column_drop",
            ModificationType::TableDrop => "table_drop",
        }
    }
}

/// One cell's before and after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellChange {
    pub row_id: i64,
    pub column: String,
    pub prior_value: CellValue,
    pub new_value: CellValue,
}

/// A complete row, keyed by its rowid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSnapshot {
    pub row_id: i64,
    pub values: Vec<ColumnValue>,
}

/// A dropped column and every value it held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    /// `(rowid, value)` pairs. Held fully in memory; very large tables make
    /// this entry large too.
    pub data: Vec<(i64, CellValue)>,
}

/// Type-specific payload, tagged by `modificationType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modificationType", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Modification {
    /// One cell (single form) or many (batch form).
    CellUpdate { cells: Vec<CellChange> },
    RowInsert { rows: Vec<RowSnapshot> },
    RowDelete { rows: Vec<RowSnapshot> },
    TableCreate { columns: Vec<ColumnDef> },
    ColumnAdd {
        column: String,
        #[serde(rename = "type")]
        column_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
    },
    ColumnDrop { columns: Vec<DroppedColumn> },
    TableDrop { create_sql: String, rows: Vec<RowSnapshot> },
}

impl Modification {
    pub fn modification_type(&self) -> ModificationType {
        match self {
            Modification::CellUpdate { .. } => ModificationType::CellUpdate,
            Modification::RowInsert { .. } => ModificationType::RowInsert,
            Modification::RowDelete { .. } => ModificationType::RowDelete,
            Modification::TableCreate { .. } => ModificationType::TableCreate,
            Modification::ColumnAdd { .. } => ModificationType::ColumnAdd,
            Modification::ColumnDrop { .. } => ModificationType::ColumnDrop,
            Modification::TableDrop { .. } => ModificationType::TableDrop,
        }
    }
}

/// The undo/redo unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationEntry {
    pub target_table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_row_id: Option<i64>,
    /// Human-readable label for the host's undo menu.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub change: Modification,
}

impl ModificationEntry {
    pub fn new(target_table: impl Into<String>, change: Modification) -> Self {
        Self {
            target_table: target_table.into(),
            target_column: None,
            target_row_id: None,
            label: None,
            change,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = Some(column.into());
        self
    }

    pub fn with_row_id(mut self, row_id: i64) -> Self {
        self.target_row_id = Some(row_id);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn modification_type(&self) -> ModificationType {
        self.change.modification_type()
    }

    /// A single-cell update entry.
    pub fn cell_update(
        table: impl Into<String>,
        row_id: i64,
        column: impl Into<String>,
        prior_value: CellValue,
        new_value: CellValue,
    ) -> Self {
        let column = column.into();
        Self::new(
            table,
            Modification::CellUpdate {
                cells: vec![CellChange {
                    row_id,
                    column: column.clone(),
                    prior_value,
                    new_value,
                }],
            },
        )
        .with_column(column)
        .with_row_id(row_id)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_wire_shape() {
        let entry = ModificationEntry::cell_update(
            "users",
            3,
            "name",
            CellValue::from("a"),
            CellValue::from("b"),
        );
        let encoded = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            encoded,
            json!({
                "targetTable": "users",
                "targetColumn": "name",
                "targetRowId": 3,
                "modificationType": "cell_update",
                "cells": [{"rowId": 3, "column": "name", "priorValue": "a", "newValue": "b"}]
            })
        );
    }

    #[test]
    fn test_column_drop_keeps_blob_data() {
        let entry = ModificationEntry::new(
            "files",
            Modification::ColumnDrop {
                columns: vec![DroppedColumn {
                    name: "payload".into(),
                    column_type: "BLOB".into(),
                    data: vec![(1, CellValue::Blob(vec![0, 255])), (2, CellValue::Null)],
                }],
            },
        );
        let encoded = serde_json::to_string(&entry).unwrap();
        let decoded: ModificationEntry = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.modification_type(), ModificationType::ColumnDrop);
    }

    #[test]
    fn test_type_names() {
        let encoded = serde_json::to_value(ModificationType::TableDrop).unwrap();
        assert_eq!(encoded, json!("table_drop"));
        assert_eq!(ModificationType::TableDrop.as_str(), "table_drop");
    }
}
