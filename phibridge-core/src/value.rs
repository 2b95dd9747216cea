//! Structured record values exchanged with codec modules.
//!
//! A [`Record`] is the decoded form of a module payload: a mapping from
//! field names to [`Value`]s. Records have no identity beyond their
//! contents; key order never affects equality, but it is kept so that a
//! decoded record encodes back with the fields in the module's order.

use indexmap::IndexMap;

/// A structured record: field name to value, in insertion order.
pub type Record = IndexMap<String, Value>;

/// Build a record from `(key, value)` pairs.
///
/// ```
/// use phibridge_core::value::{Value, record};
///
/// let user = record([("id", Value::from(1)), ("name", Value::from("a"))]);
/// assert_eq!(user["name"], Value::from("a"));
/// ```
pub fn record<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Record
where
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A single field value.
///
/// Integers and floats are distinct kinds, as are text and raw bytes; codecs
/// preserve the distinction. `UInt` only exists for integers above
/// `i64::MAX`; integer equality compares numeric value, so `Int(5)` and
/// `UInt(5)` are equal. Floats compare by bit pattern, so a NaN equals
/// itself.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer beyond the signed range.
    UInt(u64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// Raw byte sequence.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Nested record.
    Map(Record),
}

impl Value {
    /// Name of the value kind, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    /// Check if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the integer as `i64`, if it is an integer in range.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get the integer as `u64`, if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the float. Integers are not converted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the text, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the raw bytes, if this is a byte sequence.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the elements, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get the nested record, if this is a map.
    pub fn as_map(&self) -> Option<&Record> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Get a nested field by path.
    ///
    /// Supports dot notation (`"summary.rks"`) and array indexing
    /// (`"key_list[0].name"`). Returns `None` if any segment is missing.
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for part in path.split('.') {
            if let Some((field, idx_str)) = part.split_once('[') {
                if !field.is_empty() {
                    current = current.as_map()?.get(field)?;
                }
                let idx: usize = idx_str.strip_suffix(']')?.parse().ok()?;
                current = current.as_array()?.get(idx)?;
            } else {
                current = current.as_map()?.get(part)?;
            }
        }
        Some(current)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Int(a), Self::UInt(b)) | (Self::UInt(b), Self::Int(a)) => {
                u64::try_from(*a).is_ok_and(|a| a == *b)
            }
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Self::UInt(v), Self::Int)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<Record> for Value {
    fn from(map: Record) -> Self {
        Self::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::Map(record([
            ("name", Value::from("chapter")),
            (
                "key_list",
                Value::Array(vec![Value::Map(record([("name", "k0")]))]),
            ),
            ("summary", Value::Map(record([("rks", 15.5)]))),
        ]))
    }

    #[test]
    fn nested_field_access() {
        let value = sample();
        assert_eq!(value.get_field("name").and_then(Value::as_str), Some("chapter"));
        assert_eq!(
            value.get_field("summary.rks").and_then(Value::as_f64),
            Some(15.5)
        );
        assert_eq!(
            value.get_field("key_list[0].name").and_then(Value::as_str),
            Some("k0")
        );
    }

    #[test]
    fn missing_field_returns_none() {
        let value = sample();
        assert!(value.get_field("missing").is_none());
        assert!(value.get_field("key_list[3].name").is_none());
        assert!(value.get_field("name.inner").is_none());
    }

    #[test]
    fn integer_equality_spans_signedness() {
        assert_eq!(Value::Int(5), Value::UInt(5));
        assert_ne!(Value::Int(-1), Value::UInt(u64::MAX));
        assert_eq!(Value::from(u64::MAX), Value::UInt(u64::MAX));
        assert_eq!(Value::from(7u64), Value::Int(7));
    }

    #[test]
    fn kinds_are_not_coerced() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::from("ab"), Value::from(b"ab".as_slice()));
        assert_eq!(Value::Int(1).as_f64(), None);
        assert_eq!(Value::Float(1.0).as_i64(), None);
    }

    #[test]
    fn record_key_order_is_irrelevant() {
        let a = record([("id", Value::from(1)), ("name", Value::from("a"))]);
        let b = record([("name", Value::from("a")), ("id", Value::from(1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn record_keeps_insertion_order() {
        let rec = record([("show_player_id", Value::from(true)), ("avatar", Value::from("a"))]);
        let keys: Vec<&str> = rec.keys().map(String::as_str).collect();
        assert_eq!(keys, ["show_player_id", "avatar"]);
    }

    #[test]
    fn floats_compare_by_bits() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
    }

    #[test]
    fn option_conversion() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some(3)), Value::Int(3));
    }
}
