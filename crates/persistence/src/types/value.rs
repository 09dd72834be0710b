//! Tagged values and composite keys.
//!
//! [`Value`] is the heterogeneous scalar used by keys, query predicates and
//! patches. [`Key`] is an ordered list of values addressing one record
//! through its identity, primary key or an alternate key.

use std::cmp::Ordering;
use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tagged scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Instant in UTC.
    Timestamp(DateTime<Utc>),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Converts to the JSON representation used by serialized records.
    ///
    /// Timestamps become RFC 3339 strings and bytes become base64 strings,
    /// matching how `serde` serializes `chrono` and byte fields by default
    /// in the records produced by [`crate::types::Entity`] implementations.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
            Value::Bytes(bytes) => serde_json::Value::String(STANDARD.encode(bytes)),
        }
    }

    /// Converts a JSON scalar into a value. Arrays and objects yield `None`.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Integer)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Returns the ordering of a JSON field value relative to this value.
    ///
    /// Numbers compare numerically across integer and float, text compares
    /// lexicographically, timestamps compare chronologically when the JSON
    /// side parses as RFC 3339. Mismatched types are incomparable.
    pub fn compare_json(&self, json: &serde_json::Value) -> Option<Ordering> {
        match (self, json) {
            (Value::Null, serde_json::Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), serde_json::Value::Bool(b)) => b.partial_cmp(a),
            (Value::Integer(a), serde_json::Value::Number(b)) => match b.as_i64() {
                Some(b) => Some(b.cmp(a)),
                None => b.as_f64()?.partial_cmp(&(*a as f64)),
            },
            (Value::Float(a), serde_json::Value::Number(b)) => b.as_f64()?.partial_cmp(a),
            (Value::Text(a), serde_json::Value::String(b)) => Some(b.as_str().cmp(a.as_str())),
            (Value::Timestamp(a), serde_json::Value::String(b)) => {
                let b = DateTime::parse_from_rfc3339(b).ok()?.with_timezone(&Utc);
                Some(b.cmp(a))
            }
            (Value::Bytes(a), serde_json::Value::String(b)) => {
                Some(b.as_str().cmp(STANDARD.encode(a).as_str()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Bytes(bytes) => write!(f, "{}", STANDARD.encode(bytes)),
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
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An ordered, possibly composite key.
///
/// # Examples
///
/// ```
/// use helios_storage_spi::types::{Key, Value};
///
/// let single = Key::from("person-1");
/// assert_eq!(single.to_string(), "person-1");
///
/// let composite = Key::new(vec![Value::from("acme"), Value::from(7)]);
/// assert_eq!(composite.len(), 2);
/// assert_eq!(composite.to_string(), "acme:7");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<Value>);

impl Key {
    /// Creates a key from its component values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Returns the component values.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Returns the number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key has no components.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if any component is null.
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }

    /// Returns a canonical string form suitable for use as a map key.
    ///
    /// Components are encoded with their JSON form so `"1"` and `1` differ.
    pub fn canonical(&self) -> String {
        let parts: Vec<serde_json::Value> = self.0.iter().map(Value::to_json).collect();
        serde_json::Value::Array(parts).to_string()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl From<Value> for Key {
    fn from(v: Value) -> Self {
        Key(vec![v])
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key(vec![Value::from(v)])
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key(vec![Value::from(v)])
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key(vec![Value::Integer(v)])
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key(vec![Value::from(v)])
    }
}
