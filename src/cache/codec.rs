//! Value Codec Module
//!
//! Converts cache values to persistable bytes and back.

use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde_json::{Map, Number, Value};

use crate::error::{CacheError, Result};

// == Codec Trait ==
/// A value-to-bytes conversion.
pub trait Codec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

// == Structured Codec ==
/// JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))
    }
}

// == Passthrough Codec ==
/// Stores string content verbatim.
///
/// `Null` is stored as an empty payload; anything that is not a string is
/// rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Err(CacheError::Encode(format!(
                "passthrough codec only stores strings, got {}",
                kind_of(other)
            ))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| CacheError::Decode(e.to_string()))
    }
}

// == Native Codec ==
/// Compact binary encoding of the JSON data model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCodec;

/// Mirror of `serde_json::Value` that bincode can encode without
/// self-describing support.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
enum NativeValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Seq(Vec<NativeValue>),
    Map(Vec<(String, NativeValue)>),
}

impl From<&Value> for NativeValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => NativeValue::Null,
            Value::Bool(b) => NativeValue::Bool(*b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    NativeValue::UInt(u)
                } else if let Some(i) = n.as_i64() {
                    NativeValue::Int(i)
                } else {
                    NativeValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => NativeValue::Str(s.clone()),
            Value::Array(items) => NativeValue::Seq(items.iter().map(NativeValue::from).collect()),
            Value::Object(map) => NativeValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), NativeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<NativeValue> for Value {
    type Error = CacheError;

    fn try_from(native: NativeValue) -> Result<Self> {
        Ok(match native {
            NativeValue::Null => Value::Null,
            NativeValue::Bool(b) => Value::Bool(b),
            NativeValue::Int(i) => Value::Number(i.into()),
            NativeValue::UInt(u) => Value::Number(u.into()),
            NativeValue::Float(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| CacheError::Decode(format!("non-finite number {}", f)))?,
            NativeValue::Str(s) => Value::String(s),
            NativeValue::Seq(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            NativeValue::Map(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k, Value::try_from(v)?);
                }
                Value::Object(map)
            }
        })
    }
}

/// Upper bound on a native payload. Length prefixes are checked against it
/// before any allocation.
pub const NATIVE_LIMIT: usize = 64 * 1024 * 1024;

impl Codec for NativeCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let config = bincode::config::standard().with_limit::<NATIVE_LIMIT>();
        bincode::encode_to_vec(NativeValue::from(value), config)
            .map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.len() > NATIVE_LIMIT {
            return Err(CacheError::Decode(format!(
                "payload of {} bytes exceeds limit",
                bytes.len()
            )));
        }

        let config = bincode::config::standard().with_limit::<NATIVE_LIMIT>();
        let (native, read): (NativeValue, usize) = bincode::decode_from_slice(bytes, config)
            .map_err(|e| CacheError::Decode(e.to_string()))?;
        if read != bytes.len() {
            return Err(CacheError::Decode(format!(
                "{} trailing bytes after value",
                bytes.len() - read
            )));
        }
        Value::try_from(native)
    }
}

// == Process Mode ==
/// Value processing applied by the raw store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessMode {
    /// Strings stored verbatim
    #[default]
    None,
    /// JSON text
    JsonArray,
    /// JSON text; same data model as `JsonArray`
    JsonObject,
    /// Native binary encoding
    Serialize,
}

impl ProcessMode {
    fn codec(&self) -> &'static dyn Codec {
        match self {
            ProcessMode::None => &PassthroughCodec,
            ProcessMode::JsonArray | ProcessMode::JsonObject => &JsonCodec,
            ProcessMode::Serialize => &NativeCodec,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessMode::None => "NONE",
            ProcessMode::JsonArray => "JSON_ARRAY",
            ProcessMode::JsonObject => "JSON_OBJECT",
            ProcessMode::Serialize => "SERIALIZE",
        }
    }
}

impl Codec for ProcessMode {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        self.codec().encode(value)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        self.codec().decode(bytes)
    }
}

impl fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(ProcessMode::None),
            "JSON" | "JSON_ARRAY" => Ok(ProcessMode::JsonArray),
            "JSON_OBJECT" => Ok(ProcessMode::JsonObject),
            "SERIALIZE" => Ok(ProcessMode::Serialize),
            other => Err(CacheError::Encode(format!("Unknown process type: {}", other))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "name": "Ana",
            "age": 42,
            "neg": -7,
            "ratio": 0.25,
            "admin": false,
            "tags": ["a", "b", null],
            "nested": {"deep": {"list": [1, 2, 3]}}
        })
    }

    #[test]
    fn test_json_roundtrip() {
        let bytes = JsonCodec.encode(&sample()).unwrap();
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_json_decode_malformed() {
        let result = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_passthrough_verbatim() {
        let bytes = PassthroughCodec.encode(&json!("<html>ok</html>")).unwrap();
        assert_eq!(bytes, b"<html>ok</html>");
        assert_eq!(
            PassthroughCodec.decode(&bytes).unwrap(),
            json!("<html>ok</html>")
        );
    }

    #[test]
    fn test_passthrough_null_is_empty() {
        assert!(PassthroughCodec.encode(&Value::Null).unwrap().is_empty());
        assert_eq!(PassthroughCodec.decode(b"").unwrap(), json!(""));
    }

    #[test]
    fn test_passthrough_rejects_structures() {
        let result = PassthroughCodec.encode(&json!({"a": 1}));
        assert!(matches!(result, Err(CacheError::Encode(_))));
        let result = PassthroughCodec.encode(&json!(3));
        assert!(matches!(result, Err(CacheError::Encode(_))));
    }

    #[test]
    fn test_passthrough_rejects_invalid_utf8() {
        let result = PassthroughCodec.decode(&[0xff, 0xfe]);
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_native_roundtrip() {
        let bytes = NativeCodec.encode(&sample()).unwrap();
        assert_eq!(NativeCodec.decode(&bytes).unwrap(), sample());
    }

    /// Tag byte followed by a varint u64 length prefix.
    fn oversized_prefix(tag: u8, len: u64) -> Vec<u8> {
        let mut bytes = vec![tag, 0xFD];
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes
    }

    #[test]
    fn test_native_rejects_huge_length_prefix() {
        let seq = NativeCodec.decode(&oversized_prefix(6, 1 << 40));
        assert!(matches!(seq, Err(CacheError::Decode(_))));

        let string = NativeCodec.decode(&oversized_prefix(5, u64::MAX));
        assert!(matches!(string, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_native_rejects_truncated_payload() {
        let bytes = NativeCodec.encode(&sample()).unwrap();
        let result = NativeCodec.decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_native_extreme_numbers() {
        let value = json!([u64::MAX, i64::MIN, 1.5e300]);
        let bytes = NativeCodec.encode(&value).unwrap();
        assert_eq!(NativeCodec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_native_rejects_trailing_bytes() {
        let mut bytes = NativeCodec.encode(&json!("x")).unwrap();
        bytes.push(0);
        assert!(matches!(
            NativeCodec.decode(&bytes),
            Err(CacheError::Decode(_))
        ));
    }

    #[test]
    fn test_native_rejects_garbage() {
        assert!(matches!(
            NativeCodec.decode(&[0xff, 0xff, 0xff]),
            Err(CacheError::Decode(_))
        ));
    }

    #[test]
    fn test_process_mode_parse() {
        assert_eq!("none".parse::<ProcessMode>().unwrap(), ProcessMode::None);
        assert_eq!("JSON".parse::<ProcessMode>().unwrap(), ProcessMode::JsonArray);
        assert_eq!(
            "json_object".parse::<ProcessMode>().unwrap(),
            ProcessMode::JsonObject
        );
        assert_eq!(
            " SERIALIZE ".parse::<ProcessMode>().unwrap(),
            ProcessMode::Serialize
        );
        assert!("xml".parse::<ProcessMode>().is_err());
    }

    #[test]
    fn test_process_mode_dispatch() {
        let value = json!({"k": [1, 2]});
        for mode in [ProcessMode::JsonArray, ProcessMode::JsonObject, ProcessMode::Serialize] {
            let bytes = mode.encode(&value).unwrap();
            assert_eq!(mode.decode(&bytes).unwrap(), value, "mode {}", mode);
        }
        assert!(ProcessMode::None.encode(&value).is_err());
    }
}
