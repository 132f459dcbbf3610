//! # Query Builder
//!
//! Turns structured read options (filters, sort, paging) into a SELECT or
//! COUNT statement plus its bound parameters.
//!
//! Only identifiers are inlined, always through [`escape_identifier`]. Every
//! user-supplied value becomes a `?` parameter. `LIMIT`/`OFFSET` are inlined
//! because they are typed integers, never text.
//!
//! ```text
//! build_select_query("logs", { order_by: created_at, DESC, limit: 10, offset: 20 })
//!   → SELECT * FROM "logs" ORDER BY "created_at" DESC LIMIT 10 OFFSET 20
//! ```

use serde::{Deserialize, Serialize};

use crate::sql::escape_identifier;
use crate::types::CellValue;

// =============================================================================
// Options
// =============================================================================

/// Sort direction for `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A per-column substring filter (`"column" LIKE '%value%'`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub value: String,
}

impl ColumnFilter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Read options for table browsing.
///
/// The global filter searches the explicitly selected columns. With a `*`
/// projection there is nothing to search, so callers that want a global
/// filter over all columns resolve the column list first (the engine does
/// this in `fetch_table_data`/`fetch_table_count`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadOptions {
    pub columns: Option<Vec<String>>,
    pub order_by: Option<String>,
    pub order_dir: SortDirection,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub filters: Vec<ColumnFilter>,
    pub global_filter: Option<String>,
}

/// A statement plus the parameters to bind, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<CellValue>,
}

// =============================================================================
// Builders
// =============================================================================

/// Builds the paged, filtered, sorted SELECT for a table.
pub fn build_select_query(table: &str, options: &ReadOptions) -> BuiltQuery {
    let projection = match options.columns.as_deref() {
        Some(columns) if !columns.is_empty() => columns
            .iter()
            .map(|c| project_column(c))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    };

    let mut sql = format!("SELECT {projection} FROM {}", escape_identifier(table));
    let mut params = Vec::new();
    push_where(&mut sql, &mut params, options);

    if let Some(order_by) = options.order_by.as_deref() {
        sql.push_str(&format!(
            " ORDER BY {} {}",
            escape_identifier(order_by),
            options.order_dir.as_sql()
        ));
    }

    match (options.limit, options.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        // SQLite requires a LIMIT before OFFSET; -1 means unbounded
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, None) => {}
    }

    BuiltQuery { sql, params }
}

/// Builds the COUNT matching [`build_select_query`]'s filtering.
pub fn build_count_query(table: &str, options: &ReadOptions) -> BuiltQuery {
    let mut sql = format!("SELECT COUNT(*) FROM {}", escape_identifier(table));
    let mut params = Vec::new();
    push_where(&mut sql, &mut params, options);
    BuiltQuery { sql, params }
}

fn project_column(column: &str) -> String {
    if column.eq_ignore_ascii_case("rowid") {
        format!("{} AS {}", escape_identifier("rowid"), escape_identifier("rowid"))
    } else {
        escape_identifier(column)
    }
}

fn like_pattern(value: &str) -> CellValue {
    CellValue::Text(format!("%{value}%"))
}

/// Appends the WHERE clause. Column filters are ANDed in declaration order;
/// the global filter, if any, is one more ANDed OR-group.
fn push_where(sql: &mut String, params: &mut Vec<CellValue>, options: &ReadOptions) {
    let mut clauses = Vec::new();

    for filter in &options.filters {
        clauses.push(format!("{} LIKE ?", escape_identifier(&filter.column)));
        params.push(like_pattern(&filter.value));
    }

    if let Some(global) = options.global_filter.as_deref().filter(|g| !g.is_empty()) {
        let searched: Vec<&String> = options.columns.iter().flatten().collect();
        if !searched.is_empty() {
            let group = searched
                .iter()
                .map(|c| {
                    params.push(like_pattern(global));
                    format!("{} LIKE ?", escape_identifier(c))
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({group})"));
        }
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
}

// =============================================================================
// Tests
// =============================================================================
