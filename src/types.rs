//! Shared value, row and state types.

use serde::{Deserialize, Serialize};

/// A single SQL scalar as read from or bound to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Name of the storage class, as used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }
}

/// Marker for raw bytes that must bind as a BLOB.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob(pub Vec<u8>);

impl From<Blob> for Value {
    fn from(blob: Blob) -> Self {
        Value::Blob(blob.0)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Blob(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob(bytes)
    }
}

macro_rules! value_from_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Integer(i64::from(v))
            }
        })*
    };
}

value_from_integer!(i8, i16, i32, i64, u8, u16, u32, bool);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One materialized result row.
///
/// The shape follows the connection's `results_as_hash` toggle at the time
/// the row was built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Row {
    /// Column values in select-list order.
    Values(Vec<Value>),
    /// `(column name, value)` pairs in select-list order.
    Named(Vec<(String, Value)>),
}

impl Row {
    pub fn len(&self) -> usize {
        match self {
            Row::Values(values) => values.len(),
            Row::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Row::Named(_))
    }

    /// Value at column `index`, in either shape.
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            Row::Values(values) => values.get(index),
            Row::Named(pairs) => pairs.get(index).map(|(_, v)| v),
        }
    }

    /// Value of the first column named `name`. Always `None` for
    /// [`Row::Values`], which carries no names.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        match self {
            Row::Values(_) => None,
            Row::Named(pairs) => pairs.iter().find(|(n, _)| n == name).map(|(_, v)| v),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Row::Values(values) => values,
            Row::Named(pairs) => pairs.into_iter().map(|(_, v)| v).collect(),
        }
    }

    /// First column's value regardless of shape.
    pub fn into_first(self) -> Option<Value> {
        self.into_values().into_iter().next()
    }
}

/// One column of a table as reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub decl_type: String,
    #[serde(rename = "dflt_value")]
    pub default_value: Option<String>,
    #[serde(rename = "notnull")]
    pub not_null: bool,
    /// 1-based position within the primary key, 0 when not part of it.
    pub pk: i64,
}

/// Whether the engine currently holds an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    None,
    Active,
}

impl TransactionState {
    pub fn is_active(self) -> bool {
        self == TransactionState::Active
    }
}

/// Locking behavior for `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionMode {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN DEFERRED TRANSACTION",
            TransactionMode::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            TransactionMode::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
        }
    }
}

/// Authorizer verdict for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Proceed normally.
    Allow,
    /// Abort the statement with an authorization error.
    Deny,
    /// Let the statement run but treat the operation as yielding no data.
    Ignore,
}

impl Authorization {
    pub(crate) fn code(self) -> i32 {
        match self {
            Authorization::Allow => libsqlite3_sys::SQLITE_OK,
            Authorization::Deny => libsqlite3_sys::SQLITE_DENY,
            Authorization::Ignore => libsqlite3_sys::SQLITE_IGNORE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_shapes_agree_on_positional_access() {
        let values = Row::Values(vec![Value::from("foo"), Value::from(1)]);
        let named = Row::Named(vec![
            ("b".to_string(), Value::from("foo")),
            ("a".to_string(), Value::from(1)),
        ]);
        assert_eq!(values.get(0), named.get(0));
        assert_eq!(named.get_named("a"), Some(&Value::Integer(1)));
        assert_eq!(values.get_named("a"), None);
        assert_eq!(named.clone().into_first(), Some(Value::from("foo")));
        assert_eq!(values.into_values(), named.into_values());
    }

    #[test]
    fn blob_marker_binds_as_blob() {
        assert_eq!(Value::from(Blob(b"abc".to_vec())), Value::Blob(b"abc".to_vec()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(true), Value::Integer(1));
    }

    #[test]
    fn column_info_serializes_with_engine_names() {
        let info = ColumnInfo {
            cid: 1,
            name: "b".to_string(),
            decl_type: "string".to_string(),
            default_value: Some("Hello".to_string()),
            not_null: false,
            pk: 0,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["dflt_value"], "Hello");
        assert_eq!(json["notnull"], false);
    }
}
