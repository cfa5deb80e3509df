//! Wire-format codecs for bridge messages.
//!
//! Two codecs sit behind one interface: schemaless Avro ([`AvroCodec`])
//! and JSON with reversible binary-field encoding ([`JsonCodec`]).
//! [`MessageCodec`] selects the codec per the configured input/output
//! formats and optionally strips large cutout fields from inbound
//! records.

pub mod avro;
pub mod json;

pub use avro::AvroCodec;
pub use json::JsonCodec;

use crate::config::{BridgeConfig, InputFormat, OutputFormat};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// A structured record: string keys mapped to [`RecordValue`]s.
pub type Record = BTreeMap<String, RecordValue>;

/// In-memory value model shared by both codecs.
///
/// Binary fields are first-class so that a record can round-trip through
/// either wire format byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<RecordValue>),
    Map(Record),
}

impl RecordValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RecordValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Best-effort string form for key derivation.
    pub fn to_key_string(&self) -> Option<String> {
        match self {
            RecordValue::Str(s) => Some(s.clone()),
            RecordValue::Int(n) => Some(n.to_string()),
            RecordValue::Float(n) => Some(n.to_string()),
            RecordValue::Bool(b) => Some(b.to_string()),
            RecordValue::Null => None,
            _ => None,
        }
    }
}

/// Large binary image fields stripped from inbound records when the
/// `skip_cutouts` toggle is on.
pub const CUTOUT_FIELDS: [&str; 3] = ["cutoutScience", "cutoutTemplate", "cutoutDifference"];

/// Removes cutout fields from the top level of a record.
///
/// Idempotent: stripping twice equals stripping once.
pub fn strip_cutouts(record: &mut Record) {
    for field in CUTOUT_FIELDS {
        record.remove(field);
    }
}

/// Format-selecting codec for one direction pair: deserializes inbound
/// payloads per the input format, serializes outbound records per the
/// output format.
pub struct MessageCodec {
    input_format: InputFormat,
    output_format: OutputFormat,
    avro_in: Option<AvroCodec>,
    avro_out: Option<AvroCodec>,
    json: JsonCodec,
    skip_cutouts: bool,
}

impl MessageCodec {
    /// Builds the codec pair from configuration, loading Avro schemas
    /// once at construction.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let avro_in = match (config.input_format, &config.avro_schema_path) {
            (InputFormat::Avro | InputFormat::Auto, Some(path)) => Some(AvroCodec::from_file(path)?),
            (InputFormat::Avro, None) => {
                return Err(Error::Schema(
                    "Avro input format requires a schema path".to_string(),
                ))
            }
            _ => None,
        };

        let avro_out = match (config.output_format, &config.output_avro_schema_path) {
            (OutputFormat::Avro, Some(path)) => Some(AvroCodec::from_file(path)?),
            (OutputFormat::Avro, None) => {
                return Err(Error::Schema(
                    "Avro output format requires a schema path".to_string(),
                ))
            }
            _ => None,
        };

        Ok(Self {
            input_format: config.input_format,
            output_format: config.output_format,
            avro_in,
            avro_out,
            json: JsonCodec,
            skip_cutouts: config.skip_cutouts,
        })
    }

    /// Deserializes an inbound payload and applies cutout stripping.
    pub fn deserialize(&self, data: &[u8]) -> Result<Record> {
        let mut record = match self.input_format {
            InputFormat::Avro => self.avro_in()?.deserialize(data)?,
            InputFormat::Json => self.json.deserialize(data)?,
            // JSON is the more forgiving parse, try it first. Without a
            // configured schema the JSON error stands on its own.
            InputFormat::Auto => match self.json.deserialize(data) {
                Ok(record) => record,
                Err(json_err) => match &self.avro_in {
                    Some(codec) => codec.deserialize(data)?,
                    None => return Err(json_err),
                },
            },
        };

        if self.skip_cutouts {
            strip_cutouts(&mut record);
        }

        Ok(record)
    }

    /// Serializes an outbound record in the configured output format.
    pub fn serialize(&self, record: &Record) -> Result<Vec<u8>> {
        match self.output_format {
            OutputFormat::Json => self.json.serialize(record),
            OutputFormat::Avro => self
                .avro_out
                .as_ref()
                .ok_or_else(|| Error::Schema("Avro output codec not configured".to_string()))?
                .serialize(record),
        }
    }

    fn avro_in(&self) -> Result<&AvroCodec> {
        self.avro_in
            .as_ref()
            .ok_or_else(|| Error::Schema("Avro input codec not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, InputFormat};
    use std::io::Write;

    fn sample_record() -> Record {
        let mut record = Record::new();
        record.insert("objectId".to_string(), RecordValue::Str("ZTF21a".to_string()));
        record.insert(
            "cutoutScience".to_string(),
            RecordValue::Bytes(vec![1, 2, 3]),
        );
        record.insert(
            "cutoutTemplate".to_string(),
            RecordValue::Bytes(vec![4, 5, 6]),
        );
        record
    }

    #[test]
    fn test_strip_cutouts_removes_known_fields() {
        let mut record = sample_record();
        strip_cutouts(&mut record);
        assert!(record.contains_key("objectId"));
        assert!(!record.contains_key("cutoutScience"));
        assert!(!record.contains_key("cutoutTemplate"));
    }

    #[test]
    fn test_strip_cutouts_is_idempotent() {
        let mut once = sample_record();
        strip_cutouts(&mut once);
        let mut twice = once.clone();
        strip_cutouts(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_json_codec_strips_cutouts_on_input() {
        let config = BridgeConfig {
            input_format: InputFormat::Json,
            ..Default::default()
        };
        let codec = MessageCodec::from_config(&config).unwrap();

        let record = codec
            .deserialize(br#"{"objectId": "ZTF21a", "cutoutScience": "big"}"#)
            .unwrap();
        assert!(record.contains_key("objectId"));
        assert!(!record.contains_key("cutoutScience"));
    }

    #[test]
    fn test_stripping_can_be_disabled() {
        let config = BridgeConfig {
            input_format: InputFormat::Json,
            skip_cutouts: false,
            ..Default::default()
        };
        let codec = MessageCodec::from_config(&config).unwrap();

        let record = codec
            .deserialize(br#"{"objectId": "ZTF21a", "cutoutScience": "big"}"#)
            .unwrap();
        assert!(record.contains_key("cutoutScience"));
    }

    #[test]
    fn test_auto_format_falls_back_to_avro() {
        let schema = r#"{
            "type": "record",
            "name": "alert",
            "fields": [{"name": "objectId", "type": "string"}]
        }"#;
        let mut file = tempfile::Builder::new().suffix(".avsc").tempfile().unwrap();
        file.write_all(schema.as_bytes()).unwrap();

        let config = BridgeConfig {
            input_format: InputFormat::Auto,
            avro_schema_path: Some(file.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let codec = MessageCodec::from_config(&config).unwrap();

        // JSON input parses directly.
        let record = codec.deserialize(br#"{"objectId": "ZTF21a"}"#).unwrap();
        assert_eq!(
            record.get("objectId"),
            Some(&RecordValue::Str("ZTF21a".to_string()))
        );

        // Avro bytes are not valid JSON, so auto falls back.
        let mut avro_record = Record::new();
        avro_record.insert("objectId".to_string(), RecordValue::Str("ZTF21b".to_string()));
        let avro_codec = AvroCodec::from_file(file.path().to_string_lossy().as_ref()).unwrap();
        let bytes = avro_codec.serialize(&avro_record).unwrap();

        let record = codec.deserialize(&bytes).unwrap();
        assert_eq!(
            record.get("objectId"),
            Some(&RecordValue::Str("ZTF21b".to_string()))
        );
    }

    #[test]
    fn test_auto_format_without_schema_handles_json_only() {
        let config = BridgeConfig {
            input_format: InputFormat::Auto,
            avro_schema_path: None,
            ..Default::default()
        };
        let codec = MessageCodec::from_config(&config).unwrap();

        let record = codec.deserialize(br#"{"objectId": "ZTF21a"}"#).unwrap();
        assert_eq!(
            record.get("objectId"),
            Some(&RecordValue::Str("ZTF21a".to_string()))
        );

        // No Avro fallback is available, so the JSON error stands.
        let result = codec.deserialize(&[0xff, 0xfe]);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_missing_schema_file_is_schema_error() {
        let config = BridgeConfig {
            input_format: InputFormat::Avro,
            avro_schema_path: Some("/nonexistent/schema.avsc".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            MessageCodec::from_config(&config),
            Err(crate::Error::Schema(_))
        ));
    }
}
