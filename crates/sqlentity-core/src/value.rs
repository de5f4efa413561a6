//! Dynamic SQL values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically-typed SQL value.
///
/// Used for parameter binding, result fetching and as the storage type of
/// every entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Numeric view used by [`Value::loose_eq`]: numbers, booleans and text
    /// that parses completely as a number. Integers stay exact.
    fn loose_number(&self) -> Option<LooseNumber> {
        match self {
            Value::Bool(b) => Some(LooseNumber::Exact(i64::from(*b))),
            Value::Int(v) => Some(LooseNumber::Exact(i64::from(*v))),
            Value::BigInt(v) => Some(LooseNumber::Exact(*v)),
            Value::Double(v) => Some(LooseNumber::Approx(*v)),
            Value::Decimal(s) | Value::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(LooseNumber::Exact)
                    .or_else(|_| s.parse::<f64>().map(LooseNumber::Approx))
                    .ok()
            }
            _ => None,
        }
    }

    /// Compare two values the way a database compares a stored column with
    /// a bound parameter.
    ///
    /// `Null` only equals `Null`. Numeric variants compare by value, text
    /// equals a number when it parses to exactly that number and booleans
    /// equal `1` / `0`. Everything else compares structurally.
    ///
    /// ```
    /// use sqlentity_core::Value;
    ///
    /// assert!(Value::Text("5".into()).loose_eq(&Value::BigInt(5)));
    /// assert!(Value::Bool(true).loose_eq(&Value::Int(1)));
    /// assert!(!Value::Null.loose_eq(&Value::Int(0)));
    /// ```
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Json(a), Value::Text(b)) | (Value::Text(b), Value::Json(a)) => {
                serde_json::from_str::<serde_json::Value>(b).is_ok_and(|parsed| &parsed == a)
            }
            _ => match (self.loose_number(), other.loose_number()) {
                (Some(a), Some(b)) => a.same_as(b),
                _ => self == other,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LooseNumber {
    Exact(i64),
    Approx(f64),
}

impl LooseNumber {
    #[allow(clippy::float_cmp)]
    fn same_as(self, other: LooseNumber) -> bool {
        match (self, other) {
            (LooseNumber::Exact(a), LooseNumber::Exact(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            LooseNumber::Exact(v) => v as f64,
            LooseNumber::Approx(v) => v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(v) | Value::Text(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_accessors() {
        assert_eq!(Value::Int(7).as_i64(), Some(7));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Decimal("1.25".into()).as_f64(), Some(1.25));
        assert_eq!(Value::Text("x".into()).as_i64(), None);
        assert_eq!(Value::BigInt(0).as_bool(), Some(false));
    }

    #[test]
    fn option_conversion_maps_none_to_null() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
    }

    #[test]
    fn loose_eq_numbers_and_text() {
        assert!(Value::Int(5).loose_eq(&Value::BigInt(5)));
        assert!(Value::BigInt(5).loose_eq(&Value::Double(5.0)));
        assert!(Value::Text("5".into()).loose_eq(&Value::Int(5)));
        assert!(Value::Text("5.0".into()).loose_eq(&Value::BigInt(5)));
        assert!(!Value::Text("05x".into()).loose_eq(&Value::Int(5)));
        assert!(!Value::Text("5".into()).loose_eq(&Value::Text("5.0".into())));
    }

    #[test]
    fn loose_eq_keeps_large_integers_exact() {
        let above = Value::BigInt(9_007_199_254_740_993);
        let below = Value::BigInt(9_007_199_254_740_992);
        assert!(!above.loose_eq(&below));
        assert!(above.loose_eq(&Value::Text("9007199254740993".into())));
        assert!(!below.loose_eq(&Value::Text("9007199254740993".into())));
        assert!(Value::Int(7).loose_eq(&Value::Decimal("7.0".into())));
    }

    #[test]
    fn loose_eq_null_and_bool() {
        assert!(Value::Null.loose_eq(&Value::Null));
        assert!(!Value::Null.loose_eq(&Value::Text(String::new())));
        assert!(!Value::Int(0).loose_eq(&Value::Null));
        assert!(Value::Bool(false).loose_eq(&Value::BigInt(0)));
        assert!(!Value::Bool(true).loose_eq(&Value::Int(2)));
    }

    #[test]
    fn loose_eq_json_against_text() {
        let json = Value::Json(serde_json::json!({"a": 1}));
        assert!(json.loose_eq(&Value::Text(r#"{"a":1}"#.into())));
        assert!(!json.loose_eq(&Value::Text("nope".into())));
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Text("Ann".into()).to_string(), "Ann");
        assert_eq!(Value::Bytes(vec![1, 2]).to_string(), "<2 bytes>");
    }
}
