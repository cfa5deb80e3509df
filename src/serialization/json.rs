//! JSON codec with reversible binary-field encoding.
//!
//! Binary values cannot be expressed in plain JSON, so they are mapped
//! to a tagged object on the way out and recognized and reversed on the
//! way back in:
//!
//! ```json
//! {"_type": "bytes", "_encoding": "base64", "_value": "AQI="}
//! ```
//!
//! A record containing bytes fields therefore survives a JSON round
//! trip byte-for-byte.

use super::{Record, RecordValue};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

/// Stateless JSON serializer/deserializer.
pub struct JsonCodec;

impl JsonCodec {
    /// Deserializes UTF-8 JSON bytes into a record.
    ///
    /// Fails with [`Error::Decode`] on malformed UTF-8, malformed JSON,
    /// or a non-object top-level value.
    pub fn deserialize(&self, data: &[u8]) -> Result<Record> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::Decode(format!("invalid JSON: {}", e)))?;

        record_from_json(&value)
    }

    /// Serializes a record to UTF-8 JSON bytes.
    pub fn serialize(&self, record: &Record) -> Result<Vec<u8>> {
        let value = record_to_json(record);
        Ok(serde_json::to_vec(&value)?)
    }
}

/// Converts a record into a JSON value, encoding bytes fields as tagged
/// base64 objects.
pub fn record_to_json(record: &Record) -> Value {
    Value::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect(),
    )
}

/// Converts a JSON value into a record, reversing tagged base64 objects
/// back into bytes fields. The top-level value must be an object.
pub fn record_from_json(value: &Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), value_from_json(v)))
            .collect()),
        other => Err(Error::Decode(format!(
            "expected a JSON object, got {}",
            json_type_name(other)
        ))),
    }
}

fn value_to_json(value: &RecordValue) -> Value {
    match value {
        RecordValue::Null => Value::Null,
        RecordValue::Bool(b) => Value::Bool(*b),
        RecordValue::Int(n) => Value::from(*n),
        RecordValue::Float(n) => {
            serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number)
        }
        RecordValue::Str(s) => Value::String(s.clone()),
        RecordValue::Bytes(bytes) => serde_json::json!({
            "_type": "bytes",
            "_encoding": "base64",
            "_value": BASE64.encode(bytes),
        }),
        RecordValue::Array(items) => Value::Array(items.iter().map(value_to_json).collect()),
        RecordValue::Map(map) => record_to_json(map),
    }
}

/// Converts any JSON value into a [`RecordValue`], reversing tagged
/// base64 objects into bytes.
pub fn value_from_json(value: &Value) -> RecordValue {
    match value {
        Value::Null => RecordValue::Null,
        Value::Bool(b) => RecordValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                RecordValue::Int(i)
            } else {
                RecordValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => RecordValue::Str(s.clone()),
        Value::Array(items) => RecordValue::Array(items.iter().map(value_from_json).collect()),
        Value::Object(map) => {
            if let Some(bytes) = decode_tagged_bytes(map) {
                return RecordValue::Bytes(bytes);
            }
            RecordValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), value_from_json(v)))
                    .collect(),
            )
        }
    }
}

/// Recognizes the tagged bytes object shape. An object with the right
/// tags but an undecodable value is left as a plain map.
fn decode_tagged_bytes(map: &serde_json::Map<String, Value>) -> Option<Vec<u8>> {
    if map.get("_type").and_then(Value::as_str) != Some("bytes") {
        return None;
    }
    if map.get("_encoding").and_then(Value::as_str) != Some("base64") {
        return None;
    }
    let encoded = map.get("_value").and_then(Value::as_str)?;
    BASE64.decode(encoded).ok()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_field_uses_tagged_encoding() {
        let mut record = Record::new();
        record.insert("stampData".to_string(), RecordValue::Bytes(vec![0x01, 0x02]));

        let serialized = JsonCodec.serialize(&record).unwrap();
        let text = String::from_utf8(serialized).unwrap();

        assert!(text.contains(r#""_type":"bytes""#));
        assert!(text.contains(r#""_encoding":"base64""#));
        assert!(text.contains(r#""_value":"AQI=""#));
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut record = Record::new();
        record.insert("stampData".to_string(), RecordValue::Bytes(vec![0x01, 0x02]));
        record.insert("objectId".to_string(), RecordValue::Str("ZTF21a".to_string()));

        let serialized = JsonCodec.serialize(&record).unwrap();
        let restored = JsonCodec.deserialize(&serialized).unwrap();

        assert_eq!(restored, record);
    }

    #[test]
    fn test_nested_bytes_round_trip() {
        let mut inner = Record::new();
        inner.insert("blob".to_string(), RecordValue::Bytes(vec![0xff, 0x00, 0x7f]));

        let mut record = Record::new();
        record.insert("nested".to_string(), RecordValue::Map(inner));
        record.insert(
            "list".to_string(),
            RecordValue::Array(vec![
                RecordValue::Bytes(vec![9, 8]),
                RecordValue::Int(42),
                RecordValue::Null,
            ]),
        );

        let serialized = JsonCodec.serialize(&record).unwrap();
        let restored = JsonCodec.deserialize(&serialized).unwrap();

        assert_eq!(restored, record);
    }

    #[test]
    fn test_malformed_utf8_is_decode_error() {
        let result = JsonCodec.deserialize(&[0xff, 0xfe, 0x01]);
        assert!(matches!(result, Err(crate::Error::Decode(_))));
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let result = JsonCodec.deserialize(b"{not json");
        assert!(matches!(result, Err(crate::Error::Decode(_))));
    }

    #[test]
    fn test_non_object_top_level_is_decode_error() {
        let result = JsonCodec.deserialize(b"[1, 2, 3]");
        assert!(matches!(result, Err(crate::Error::Decode(_))));
    }

    #[test]
    fn test_incomplete_tag_stays_a_map() {
        let record = JsonCodec
            .deserialize(br#"{"field": {"_type": "bytes", "_value": "AQI="}}"#)
            .unwrap();
        // No _encoding tag, so this is just a nested map.
        assert!(matches!(record.get("field"), Some(RecordValue::Map(_))));
    }

    #[test]
    fn test_numbers_preserve_integer_vs_float() {
        let record = JsonCodec
            .deserialize(br#"{"candid": 1234567890123, "magpsf": 18.5}"#)
            .unwrap();
        assert_eq!(record.get("candid"), Some(&RecordValue::Int(1234567890123)));
        assert_eq!(record.get("magpsf"), Some(&RecordValue::Float(18.5)));
    }
}
