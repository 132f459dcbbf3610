//! # Domain Types for litedit
//!
//! This module defines the values that flow between the document controller,
//! the RPC transport, and the SQLite engine: cells, row ids, column
//! definitions, result sets and schema descriptions.
//!
//! ## Design Philosophy: Exact Round-Trips
//!
//! A [`CellValue`] must survive three encodings without changing type:
//!
//! - SQL literal rendering ([`crate::sql::cell_value_to_sql`])
//! - parameter binding (`rusqlite::ToSql`)
//! - JSON on the wire and in hot-exit backups
//!
//! The JSON encoding is the delicate one. Integers and floats stay distinct
//! (`1` vs `1.0`), and blobs are written as a tagged object
//! `{"__type": "Uint8Array", "data": "<base64>"}` instead of letting a generic
//! serializer turn them into per-index keyed objects.
//!
//! ## Row Ids at the Boundary
//!
//! [`RecordId`] accepts a number or a string when deserialized, but only
//! produces a value if the input is a finite integer. Invalid input fails the
//! whole operation; it is never silently coerced to 0.

use std::fmt;

use base64::Engine as _;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Type tag used for binary values in JSON encodings.
pub const BLOB_TYPE_TAG: &str = "Uint8Array";

// =============================================================================
// CellValue
// =============================================================================

/// A single SQLite cell.
///
/// # Rust Pattern: Closed Enum
///
/// SQLite has exactly five storage classes, so the enum has exactly five
/// variants. Anything outside them (booleans from JSON, for example) is mapped
/// to the nearest class on the way in.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Returns the text content, if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the storage class name, as SQLite's `typeof()` would.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Integer(_) => "integer",
            CellValue::Float(_) => "real",
            CellValue::Text(_) => "text",
            CellValue::Blob(_) => "blob",
        }
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Integer(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Integer(i64::from(v))
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(v: Vec<u8>) -> Self {
        CellValue::Blob(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(f) => CellValue::Float(f),
            ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => CellValue::Blob(bytes.to_vec()),
        }
    }
}

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CellValue::Null => ToSqlOutput::Owned(Value::Null),
            CellValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            CellValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            CellValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            CellValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl FromSql for CellValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(value.into())
    }
}

/// Encodes bytes as the tagged JSON object used for blobs.
pub fn blob_to_json(bytes: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "__type": BLOB_TYPE_TAG,
        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Decodes a tagged blob object; returns `None` if `value` is not one.
pub fn blob_from_json(value: &serde_json::Value) -> Option<Vec<u8>> {
    let obj = value.as_object()?;
    if obj.get("__type")?.as_str()? != BLOB_TYPE_TAG {
        return None;
    }
    let data = obj.get("data")?.as_str()?;
    base64::engine::general_purpose::STANDARD.decode(data).ok()
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_unit(),
            CellValue::Integer(i) => serializer.serialize_i64(*i),
            CellValue::Float(f) => serializer.serialize_f64(*f),
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Blob(bytes) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("__type", BLOB_TYPE_TAG)?;
                map.serialize_entry(
                    "data",
                    &base64::engine::general_purpose::STANDARD.encode(bytes),
                )?;
                map.end()
            }
        }
    }
}

struct CellValueVisitor;

impl<'de> Visitor<'de> for CellValueVisitor {
    type Value = CellValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, a number, a string, or a tagged Uint8Array object")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<CellValue, D::Error> {
        d.deserialize_any(self)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Integer(i64::from(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<CellValue, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => CellValue::Integer(i),
            Err(_) => CellValue::Float(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Text(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Blob(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<CellValue, E> {
        Ok(CellValue::Blob(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<CellValue, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Ok(CellValue::Blob(bytes))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<CellValue, A::Error> {
        let mut tag: Option<String> = None;
        let mut data: Option<String> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "__type" => tag = Some(map.next_value()?),
                "data" => data = Some(map.next_value()?),
                _ => {
                    let _: de::IgnoredAny = map.next_value()?;
                }
            }
        }
        match (tag.as_deref(), data) {
            (Some(BLOB_TYPE_TAG), Some(data)) => base64::engine::general_purpose::STANDARD
                .decode(data)
                .map(CellValue::Blob)
                .map_err(|e| de::Error::custom(format!("invalid base64 blob: {e}"))),
            _ => Err(de::Error::custom("object cell values must be tagged Uint8Array blobs")),
        }
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(CellValueVisitor)
    }
}

// =============================================================================
// RecordId
// =============================================================================

/// A SQLite rowid that has been validated to be a finite integer.
///
/// # Rust Pattern: Parse, Don't Validate
///
/// The only ways to build a `RecordId` are from an `i64` or through a
/// validating parser. Once you hold one, every statement can bind it without
/// re-checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(i64);

impl RecordId {
    /// Wraps a raw rowid.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw rowid.
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Parses a row id from its string form.
    pub fn parse(input: &str) -> Result<Self> {
        input
            .trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| Error::InvalidRowId(input.to_string()))
    }

    /// Accepts a float only if it is finite and integral.
    pub fn from_f64(value: f64) -> Result<Self> {
        // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
        const LOWER: f64 = -9_223_372_036_854_775_808.0;
        const UPPER: f64 = 9_223_372_036_854_775_808.0;
        if value.is_finite() && value.fract() == 0.0 && (LOWER..UPPER).contains(&value) {
            Ok(Self(value as i64))
        } else {
            Err(Error::InvalidRowId(value.to_string()))
        }
    }

    /// Validates a JSON value (number or string) as a row id.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self(i))
                } else if let Some(f) = n.as_f64() {
                    Self::from_f64(f)
                } else {
                    Err(Error::InvalidRowId(n.to_string()))
                }
            }
            serde_json::Value::String(s) => Self::parse(s),
            other => Err(Error::InvalidRowId(other.to_string())),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for RecordId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::Integer(self.0)))
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        RecordId::from_json(&value).map_err(de::Error::custom)
    }
}

// =============================================================================
// Columns and Rows
// =============================================================================

/// Structured column definition for `CREATE TABLE`.
///
/// Bare-string definitions (`"name TEXT"`) are deliberately not accepted:
/// they would have to be interpolated into DDL as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
}

impl ColumnDef {
    /// Creates a nullable, non-key column.
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            primary_key: false,
            not_null: false,
        }
    }

    /// Marks the column as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// One named value in a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValue {
    pub column: String,
    pub value: CellValue,
}

impl ColumnValue {
    pub fn new(column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// The shape of a batched cell update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellOperation {
    /// Write `value` directly.
    Set,
    /// Read the current JSON text, merge-patch it, write the result.
    JsonPatch,
}

/// One cell in an `updateCellBatch` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellUpdate {
    pub row_id: RecordId,
    pub column: String,
    #[serde(default)]
    pub value: CellValue,
    /// RFC 7396 patch; when present the update is a [`CellOperation::JsonPatch`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<serde_json::Value>,
}

impl CellUpdate {
    /// A direct write.
    pub fn set(row_id: impl Into<RecordId>, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        Self {
            row_id: row_id.into(),
            column: column.into(),
            value: value.into(),
            patch: None,
        }
    }

    /// A JSON merge-patch update.
    pub fn json_patch(row_id: impl Into<RecordId>, column: impl Into<String>, patch: serde_json::Value) -> Self {
        Self {
            row_id: row_id.into(),
            column: column.into(),
            value: CellValue::Null,
            patch: Some(patch),
        }
    }

    pub fn operation(&self) -> CellOperation {
        if self.patch.is_some() {
            CellOperation::JsonPatch
        } else {
            CellOperation::Set
        }
    }
}

// =============================================================================
// Query Results and Schema
// =============================================================================

/// Columns and rows produced by one statement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    /// Returns the index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Returns the first cell of the first row, if any.
    pub fn scalar(&self) -> Option<&CellValue> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// One entry of the schema catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaObject {
    pub name: String,
    pub table_name: String,
    pub sql: Option<String>,
}

/// The schema catalog partitioned by object type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<SchemaObject>,
    pub views: Vec<SchemaObject>,
    pub indexes: Vec<SchemaObject>,
}

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// 1-based position in the primary key, 0 if not part of it.
    pub primary_key: i64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_value_json_keeps_storage_class() {
        let values = vec![
            CellValue::Null,
            CellValue::Integer(42),
            CellValue::Float(1.0),
            CellValue::Text("héllo".to_string()),
            CellValue::Blob(vec![0xde, 0xad, 0xbe, 0xef]),
        ];
        let encoded = serde_json::to_string(&values).unwrap();
        let decoded: Vec<CellValue> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_blob_is_tagged_not_index_keyed() {
        let encoded = serde_json::to_value(CellValue::Blob(vec![1, 2, 3])).unwrap();
        assert_eq!(encoded, json!({"__type": "Uint8Array", "data": "AQID"}));
        assert_eq!(blob_from_json(&encoded), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_untagged_object_is_rejected() {
        let result: std::result::Result<CellValue, _> = serde_json::from_value(json!({"0": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn test_record_id_accepts_numbers_and_strings() {
        assert_eq!(RecordId::from_json(&json!(7)).unwrap().as_i64(), 7);
        assert_eq!(RecordId::from_json(&json!("12")).unwrap().as_i64(), 12);
        assert_eq!(RecordId::from_json(&json!(3.0)).unwrap().as_i64(), 3);
    }

    #[test]
    fn test_record_id_rejects_garbage() {
        assert!(matches!(
            RecordId::from_json(&json!("abc")),
            Err(Error::InvalidRowId(_))
        ));
        assert!(RecordId::from_json(&json!(1.5)).is_err());
        assert!(RecordId::from_json(&json!(null)).is_err());
        assert!(RecordId::from_f64(f64::NAN).is_err());
        assert!(RecordId::from_f64(f64::INFINITY).is_err());

        let parsed: std::result::Result<Vec<RecordId>, _> =
            serde_json::from_value(json!([1, "2", "x"]));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_record_id_float_range_is_exact() {
        let two_63 = 2f64.powi(63);
        assert!(matches!(RecordId::from_f64(two_63), Err(Error::InvalidRowId(_))));
        assert!(RecordId::from_json(&json!(u64::MAX)).is_err());
        assert_eq!(RecordId::from_f64(-two_63).unwrap().as_i64(), i64::MIN);
        assert!(RecordId::from_f64(-two_63 * 2.0).is_err());
        assert_eq!(RecordId::from_f64(2f64.powi(62)).unwrap().as_i64(), 1 << 62);
    }

    #[test]
    fn test_column_def_wire_shape() {
        let def = ColumnDef::new("id", "INTEGER").primary_key();
        let encoded = serde_json::to_value(&def).unwrap();
        assert_eq!(
            encoded,
            json!({"name": "id", "type": "INTEGER", "primaryKey": true, "notNull": false})
        );

        let legacy: std::result::Result<ColumnDef, _> = serde_json::from_value(json!("id INTEGER"));
        assert!(legacy.is_err());
    }

    #[test]
    fn test_cell_update_operation() {
        assert_eq!(CellUpdate::set(1i64, "a", 5).operation(), CellOperation::Set);
        assert_eq!(
            CellUpdate::json_patch(1i64, "a", json!({"k": 1})).operation(),
            CellOperation::JsonPatch
        );
    }
}
