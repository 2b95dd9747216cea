//! JSON codec used by the text-framed module builds.

use super::Codec;
use crate::error::{BridgeError, Result};
use crate::value::{Record, Value};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;

/// Encodes records as compact UTF-8 JSON objects.
///
/// JSON has no byte-string type, so `Value::Bytes` is rejected at encode
/// time instead of being silently turned into text. Non-finite floats are
/// rejected for the same reason. Numbers without a fraction or exponent
/// decode as integers; all others decode as floats. Object keys keep their
/// order, and an object that repeats a key is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let object = record_to_json(record)?;
        serde_json::to_vec(&object).map_err(BridgeError::encode)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record> {
        let JsonNode(value) =
            serde_json::from_slice::<JsonNode>(bytes).map_err(BridgeError::decode)?;
        match value {
            Value::Map(record) => Ok(record),
            other => Err(BridgeError::decode(format!(
                "expected a JSON object at top level, found {}",
                other.type_name()
            ))),
        }
    }

    fn is_text_safe(&self) -> bool {
        true
    }
}

fn record_to_json(record: &Record) -> Result<JsonValue> {
    let mut map = Map::with_capacity(record.len());
    for (key, value) in record {
        map.insert(key.clone(), to_json(key, value)?);
    }
    Ok(JsonValue::Object(map))
}

fn to_json(field: &str, value: &Value) -> Result<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(v) => JsonValue::Number((*v).into()),
        Value::UInt(v) => JsonValue::Number((*v).into()),
        Value::Float(v) => Number::from_f64(*v).map(JsonValue::Number).ok_or_else(|| {
            BridgeError::encode(format!("field '{}' holds non-finite float {}", field, v))
        })?,
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(_) => {
            return Err(BridgeError::encode(format!(
                "field '{}' holds raw bytes, which JSON cannot carry",
                field
            )));
        }
        Value::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| to_json(field, item))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(map) => record_to_json(map)?,
    })
}

/// A JSON value read straight into a [`Value`].
struct JsonNode(Value);

impl<'de> Deserialize<'de> for JsonNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(NodeVisitor).map(JsonNode)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(JsonNode(item)) = seq.next_element::<JsonNode>()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let mut record = Record::new();
        while let Some(key) = map.next_key::<String>()? {
            if record.contains_key(&key) {
                return Err(de::Error::custom(format!("duplicate key '{}'", key)));
            }
            let JsonNode(value) = map.next_value::<JsonNode>()?;
            record.insert(key, value);
        }
        Ok(Value::Map(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::record;

    #[test]
    fn round_trip_keeps_int_and_float_apart() {
        let rec = record([
            ("whole", Value::Float(2.0)),
            ("count", Value::Int(2)),
            ("big", Value::UInt(u64::MAX)),
            ("items", Value::Array(vec![Value::Null, Value::Bool(false)])),
            ("intro", Value::from("line\u{0}break")),
        ]);
        let bytes = JsonCodec.encode(&rec).unwrap();
        let back = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(back, rec);
        assert!(matches!(back["whole"], Value::Float(_)));
        assert!(matches!(back["count"], Value::Int(2)));
    }

    #[test]
    fn output_never_contains_nul() {
        let rec = record([("intro", Value::from("a\u{0}b"))]);
        let bytes = JsonCodec.encode(&rec).unwrap();
        assert!(!bytes.contains(&0));
    }

    #[test]
    fn rejects_raw_bytes() {
        let rec = record([("blob", Value::Bytes(vec![1, 2, 3]))]);
        let err = JsonCodec.encode(&rec).unwrap_err();
        assert_eq!(err.code(), "B004");
        assert!(err.to_string().contains("blob"));
    }

    #[test]
    fn rejects_non_finite_float() {
        let rec = record([("rks", Value::Float(f64::INFINITY))]);
        assert!(JsonCodec.encode(&rec).is_err());
    }

    #[test]
    fn keeps_key_order() {
        let text = br#"{"show_player_id":true,"self_intro":"","avatar":"a","background":"b"}"#;
        let rec = JsonCodec.decode(text).unwrap();
        let keys: Vec<&str> = rec.keys().map(String::as_str).collect();
        assert_eq!(keys, ["show_player_id", "self_intro", "avatar", "background"]);
        assert_eq!(JsonCodec.encode(&rec).unwrap(), text);
    }

    #[test]
    fn rejects_repeated_keys() {
        let err = JsonCodec.decode(br#"{"a":1,"a":2}"#).unwrap_err();
        assert_eq!(err.code(), "B003");
        assert!(err.to_string().contains("duplicate key 'a'"));

        // Nested objects are checked too.
        assert!(JsonCodec.decode(br#"{"m":{"k":1,"k":1}}"#).is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(JsonCodec.decode(b"{\"id\": ").unwrap_err().code(), "B003");
        assert!(JsonCodec.decode(b"[1, 2]").is_err());
    }
}
