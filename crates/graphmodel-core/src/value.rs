//! Dynamic graph property values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConversionError, Error};

/// A dynamically-typed property value.
///
/// The primitive variants (`Null` through `Map`) are what a property graph
/// store accepts as parameters. `Date`, `Timestamp`, `Uuid`, `Decimal` and
/// `Json` are domain values: they must pass through a converter registered in
/// the metadata model before they can be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent / NULL
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point
    Float(f64),

    /// Text string
    String(String),

    /// Byte array
    Bytes(Vec<u8>),

    /// Homogeneous list of primitives
    List(Vec<Value>),

    /// String-keyed map (statement parameters only, never a stored property)
    Map(BTreeMap<String, Value>),

    /// Date (days since epoch)
    Date(i32),

    /// Timestamp (microseconds since epoch, UTC)
    Timestamp(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// JSON document
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
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Uuid(_) => "UUID",
            Value::Decimal(_) => "DECIMAL",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Date(v) => Some(i64::from(*v)),
            Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a list of values.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Collect the string elements of a list value.
    ///
    /// A single string is treated as a one-element list; NULL yields nothing.
    pub fn string_items(&self) -> Vec<String> {
        match self {
            Value::String(s) => vec![s.clone()],
            Value::List(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the store can hold this value as a property without conversion.
    pub fn is_graph_primitive(&self) -> bool {
        self.check_graph_primitive().is_ok()
    }

    /// Check that this value can be stored as a node or relationship property.
    ///
    /// Lists must be homogeneous and may not nest or contain NULL. Maps are only
    /// valid as whole parameter payloads, never as property values.
    pub fn check_graph_primitive(&self) -> std::result::Result<(), String> {
        match self {
            Value::Null
            | Value::Bool(_)
            | Value::Integer(_)
            | Value::Float(_)
            | Value::String(_)
            | Value::Bytes(_) => Ok(()),
            Value::List(items) => {
                let mut element_type: Option<&'static str> = None;
                for item in items {
                    match item {
                        Value::Null | Value::List(_) | Value::Map(_) => {
                            return Err(format!(
                                "list element of type {} is not storable",
                                item.type_name()
                            ));
                        }
                        _ => {}
                    }
                    item.check_graph_primitive()?;
                    match element_type {
                        None => element_type = Some(item.type_name()),
                        Some(expected) if expected != item.type_name() => {
                            return Err(format!(
                                "list mixes {} and {} elements",
                                expected,
                                item.type_name()
                            ));
                        }
                        Some(_) => {}
                    }
                }
                Ok(())
            }
            other => Err(format!(
                "{} is not a graph primitive and needs a converter",
                other.type_name()
            )),
        }
    }

    /// Render this value as JSON, used for logging and statement parameter dumps.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) | Value::Decimal(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|x| serde_json::Value::from(*x)).collect())
            }
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Date(d) => serde_json::Value::from(*d),
            Value::Timestamp(ts) => serde_json::Value::from(*ts),
            Value::Uuid(u) => serde_json::Value::String(crate::convert::format_uuid(u)),
            Value::Json(j) => j.clone(),
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
        Value::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
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

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::String).collect())
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::List(v.into_iter().map(Value::Integer).collect())
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

// TryFrom implementations for extracting values

fn mismatch(expected: &'static str, actual: &Value) -> Error {
    Error::Conversion(ConversionError::new(format!(
        "expected {expected}, found {}",
        actual.type_name()
    )))
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(v) => Ok(v),
            other => Err(mismatch("i64", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64().ok_or_else(|| mismatch("f64", &value))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) | Value::Decimal(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_values_are_storable() {
        assert!(Value::Null.is_graph_primitive());
        assert!(Value::from("a").is_graph_primitive());
        assert!(Value::from(vec![1_i64, 2, 3]).is_graph_primitive());
    }

    #[test]
    fn test_domain_values_need_conversion() {
        assert!(!Value::Date(10).is_graph_primitive());
        assert!(!Value::Uuid([0; 16]).is_graph_primitive());
        assert!(!Value::Json(serde_json::json!({"a": 1})).is_graph_primitive());
    }

    #[test]
    fn test_heterogeneous_list_rejected() {
        let mixed = Value::List(vec![Value::Integer(1), Value::from("x")]);
        let err = mixed.check_graph_primitive().unwrap_err();
        assert!(err.contains("mixes"));
    }

    #[test]
    fn test_nested_list_and_map_rejected() {
        let nested = Value::List(vec![Value::List(vec![])]);
        assert!(!nested.is_graph_primitive());
        assert!(!Value::Map(BTreeMap::new()).is_graph_primitive());
    }

    #[test]
    fn test_string_items() {
        let labels = Value::from(vec!["Admin".to_string(), "Staff".to_string()]);
        assert_eq!(labels.string_items(), vec!["Admin", "Staff"]);
        assert_eq!(Value::from("Solo").string_items(), vec!["Solo"]);
        assert!(Value::Null.string_items().is_empty());
    }

    #[test]
    fn test_try_from_mismatch() {
        let id: i64 = Value::Integer(7).try_into().unwrap();
        assert_eq!(id, 7);
        let bad: Result<i64, _> = Value::from("x").try_into();
        assert!(bad.is_err());
    }

    #[test]
    fn test_to_json() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from("f"));
        map.insert("size".to_string(), Value::Integer(3));
        assert_eq!(
            Value::Map(map).to_json(),
            serde_json::json!({"name": "f", "size": 3})
        );
    }
}
