//! MessagePack codec (the packed binary object format).

use super::Codec;
use crate::error::{BridgeError, Result};
use crate::value::{Record, Value};
use rmpv::Value as MsgpackValue;

/// Encodes records as MessagePack maps with named fields.
///
/// Integers are written in their most compact form, floats always as
/// 64-bit, byte sequences as `bin`. Decoding widens 32-bit floats to `f64`
/// and rejects extension types, non-string or repeated map keys, invalid
/// UTF-8 text and trailing bytes after the top-level map. Map entries keep
/// their order in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

impl Codec for MessagePackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let value = record_to_msgpack(record);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value).map_err(BridgeError::encode)?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record> {
        let mut rd = bytes;
        let value = rmpv::decode::read_value(&mut rd).map_err(BridgeError::decode)?;
        if !rd.is_empty() {
            return Err(BridgeError::decode(format!(
                "{} trailing bytes after top-level object",
                rd.len()
            )));
        }
        match value {
            MsgpackValue::Map(entries) => map_from_msgpack(entries),
            other => Err(BridgeError::decode(format!(
                "expected a map at top level, found {}",
                msgpack_kind(&other)
            ))),
        }
    }

    fn is_text_safe(&self) -> bool {
        false
    }
}

fn record_to_msgpack(record: &Record) -> MsgpackValue {
    MsgpackValue::Map(
        record
            .iter()
            .map(|(k, v)| (MsgpackValue::from(k.as_str()), to_msgpack(v)))
            .collect(),
    )
}

fn to_msgpack(value: &Value) -> MsgpackValue {
    match value {
        Value::Null => MsgpackValue::Nil,
        Value::Bool(b) => MsgpackValue::Boolean(*b),
        Value::Int(v) => MsgpackValue::from(*v),
        Value::UInt(v) => MsgpackValue::from(*v),
        Value::Float(v) => MsgpackValue::F64(*v),
        Value::String(s) => MsgpackValue::from(s.as_str()),
        Value::Bytes(b) => MsgpackValue::Binary(b.clone()),
        Value::Array(items) => MsgpackValue::Array(items.iter().map(to_msgpack).collect()),
        Value::Map(map) => record_to_msgpack(map),
    }
}

fn map_from_msgpack(entries: Vec<(MsgpackValue, MsgpackValue)>) -> Result<Record> {
    let mut record = Record::with_capacity(entries.len());
    for (key, value) in entries {
        let key = match key {
            MsgpackValue::String(s) => s
                .into_str()
                .ok_or_else(|| BridgeError::decode("map key is not valid UTF-8"))?,
            other => {
                return Err(BridgeError::decode(format!(
                    "map key must be a string, found {}",
                    msgpack_kind(&other)
                )));
            }
        };
        if record.contains_key(&key) {
            return Err(BridgeError::decode(format!("duplicate map key '{}'", key)));
        }
        record.insert(key, from_msgpack(value)?);
    }
    Ok(record)
}

fn from_msgpack(value: MsgpackValue) -> Result<Value> {
    Ok(match value {
        MsgpackValue::Nil => Value::Null,
        MsgpackValue::Boolean(b) => Value::Bool(b),
        MsgpackValue::Integer(n) => match n.as_i64() {
            Some(v) => Value::Int(v),
            None => n
                .as_u64()
                .map(Value::UInt)
                .ok_or_else(|| BridgeError::decode("integer out of range"))?,
        },
        MsgpackValue::F32(v) => Value::Float(v.into()),
        MsgpackValue::F64(v) => Value::Float(v),
        MsgpackValue::String(s) => Value::String(
            s.into_str()
                .ok_or_else(|| BridgeError::decode("string is not valid UTF-8"))?,
        ),
        MsgpackValue::Binary(b) => Value::Bytes(b),
        MsgpackValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_msgpack)
                .collect::<Result<Vec<_>>>()?,
        ),
        MsgpackValue::Map(entries) => Value::Map(map_from_msgpack(entries)?),
        MsgpackValue::Ext(tag, _) => {
            return Err(BridgeError::decode(format!(
                "unsupported extension type {}",
                tag
            )));
        }
    })
}

fn msgpack_kind(value: &MsgpackValue) -> &'static str {
    match value {
        MsgpackValue::Nil => "nil",
        MsgpackValue::Boolean(_) => "bool",
        MsgpackValue::Integer(_) => "integer",
        MsgpackValue::F32(_) | MsgpackValue::F64(_) => "float",
        MsgpackValue::String(_) => "string",
        MsgpackValue::Binary(_) => "binary",
        MsgpackValue::Array(_) => "array",
        MsgpackValue::Map(_) => "map",
        MsgpackValue::Ext(..) => "ext",
    }
}
