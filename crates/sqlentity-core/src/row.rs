//! Result rows and typed extraction.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Column names of a result set, shared by every row it produced.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create column info from an ordered list of names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a row owning its own column metadata.
    ///
    /// Drivers producing many rows should build one [`ColumnInfo`] and use
    /// [`Row::with_columns`].
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            values,
            columns: Arc::new(ColumnInfo::new(column_names)),
        }
    }

    /// Create a row sharing column metadata with its siblings.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.index_of(name).is_some()
    }

    /// Get a typed value by column index.
    #[allow(clippy::result_large_err)]
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| {
            type_error(
                std::any::type_name::<T>(),
                format!("index {} out of bounds (row has {} columns)", index, self.len()),
            )
        })?;
        T::from_value(value)
    }

    /// Get a typed value by column name.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_names().zip(self.values.iter())
    }

    /// Consume the row into a column-name keyed record.
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.columns
            .names()
            .iter()
            .cloned()
            .zip(self.values)
            .collect()
    }
}

fn type_error(expected: &'static str, actual: String) -> Error {
    Error::Type(TypeError {
        expected,
        actual,
        column: None,
    })
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    type_error(expected, value.type_name().to_string())
}

/// Conversion from a stored [`Value`] to a typed field.
pub trait FromValue: Sized {
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let v = value.as_i64().ok_or_else(|| mismatch("i32", value))?;
        i32::try_from(v).map_err(|_| type_error("i32", format!("value {} out of range", v)))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| mismatch("i64", value))
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Result<Self> {
        let v = value.as_i64().ok_or_else(|| mismatch("u32", value))?;
        u32::try_from(v).map_err(|_| type_error("u32", format!("value {} out of range", v)))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::Json(v) => Ok(v.to_string()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("Vec<u8>", value))
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s)
                .map_err(|e| type_error("valid JSON", format!("invalid JSON: {}", e))),
            _ => Err(mismatch("JSON", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["id".to_string(), "name".to_string(), "score".to_string()],
            vec![
                Value::BigInt(3),
                Value::Text("Ann".to_string()),
                Value::Null,
            ],
        )
    }

    #[test]
    fn named_and_indexed_access() {
        let row = sample();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(1), Some(&Value::Text("Ann".to_string())));
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.get_named::<i32>("id").unwrap(), 3);
        assert_eq!(row.get_as::<String>(1).unwrap(), "Ann");
        assert_eq!(row.get_named::<Option<f64>>("score").unwrap(), None);
    }

    #[test]
    fn errors_carry_column_name() {
        let row = sample();
        match row.get_named::<i64>("name") {
            Err(Error::Type(te)) => assert_eq!(te.column.as_deref(), Some("name")),
            other => panic!("expected type error, got {other:?}"),
        }
        assert!(row.get_named::<i64>("score").is_err());
        assert!(row.get_as::<i64>(10).is_err());
    }

    #[test]
    fn into_map_keeps_every_column() {
        let map = sample().into_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("id"), Some(&Value::BigInt(3)));
        assert_eq!(map.get("score"), Some(&Value::Null));
    }

    #[test]
    fn shared_columns() {
        let columns = Arc::new(ColumnInfo::new(vec!["a".to_string()]));
        let r1 = Row::with_columns(Arc::clone(&columns), vec![Value::Int(1)]);
        let r2 = Row::with_columns(Arc::clone(&columns), vec![Value::Int(2)]);
        assert!(Arc::ptr_eq(&r1.column_info(), &r2.column_info()));
        let pairs: Vec<_> = r2.iter().collect();
        assert_eq!(pairs, vec![("a", &Value::Int(2))]);
    }

    #[test]
    fn narrowing_conversions_check_range() {
        assert!(i32::from_value(&Value::BigInt(i64::MAX)).is_err());
        assert_eq!(u32::from_value(&Value::Int(9)).unwrap(), 9);
        assert!(u32::from_value(&Value::Int(-1)).is_err());
        assert!(bool::from_value(&Value::BigInt(1)).unwrap());
        assert_eq!(
            serde_json::Value::from_value(&Value::Text("[1]".into())).unwrap(),
            serde_json::json!([1])
        );
    }
}
