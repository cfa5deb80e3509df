//! Schemaless Avro codec.
//!
//! Encodes and decodes single-record Avro datums with no embedded
//! schema and no registry round-trip; both ends of the topic share the
//! schema out-of-band via identical configuration. The schema is loaded
//! once at construction, from either a `.avsc` JSON description or the
//! header of a self-describing `.avro` container file.

use super::{Record, RecordValue};
use crate::{Error, Result};
use apache_avro::types::Value as AvroValue;
use apache_avro::{Reader, Schema};
use std::path::Path;

pub struct AvroCodec {
    schema: Schema,
}

impl AvroCodec {
    /// Loads the schema from a file and builds the codec.
    ///
    /// `.avsc` files are parsed as JSON schema text, `.avro` files have
    /// their writer schema extracted from the container header. Any
    /// other extension is tried as JSON first, then as a container.
    pub fn from_file(path: &str) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Schema(format!("cannot read schema file {}: {}", path, e)))?;

        let schema = match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("avsc") => parse_schema_json(&bytes, path)?,
            Some("avro") => extract_container_schema(&bytes, path)?,
            _ => parse_schema_json(&bytes, path)
                .or_else(|_| extract_container_schema(&bytes, path))?,
        };

        Ok(Self { schema })
    }

    pub fn with_schema(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decodes a schemaless Avro datum into a record.
    pub fn deserialize(&self, data: &[u8]) -> Result<Record> {
        let value = apache_avro::from_avro_datum(&self.schema, &mut &data[..], None)
            .map_err(|e| Error::Decode(format!("Avro decode failed: {}", e)))?;

        match value {
            AvroValue::Record(fields) => fields
                .into_iter()
                .map(|(name, value)| Ok((name, avro_to_value(value)?)))
                .collect(),
            other => Err(Error::Decode(format!(
                "top-level Avro value is not a record: {:?}",
                other
            ))),
        }
    }

    /// Encodes a record as a schemaless Avro datum.
    ///
    /// Field order does not matter: values are resolved against the
    /// schema by name, with schema defaults filling missing fields.
    /// Resolution also wraps values of union-typed fields in the
    /// matching union variant, which the encoder requires.
    pub fn serialize(&self, record: &Record) -> Result<Vec<u8>> {
        let value = AvroValue::Record(
            record
                .iter()
                .map(|(name, value)| (name.clone(), value_to_avro(value)))
                .collect(),
        )
        .resolve(&self.schema)
        .map_err(|e| Error::Schema(format!("value does not match Avro schema: {}", e)))?;

        apache_avro::to_avro_datum(&self.schema, value)
            .map_err(|e| Error::Schema(format!("Avro encode failed: {}", e)))
    }
}

fn parse_schema_json(bytes: &[u8], path: &str) -> Result<Schema> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Schema(format!("schema file {} is not UTF-8: {}", path, e)))?;
    Schema::parse_str(text)
        .map_err(|e| Error::Schema(format!("cannot parse schema {}: {}", path, e)))
}

fn extract_container_schema(bytes: &[u8], path: &str) -> Result<Schema> {
    let reader = Reader::new(bytes)
        .map_err(|e| Error::Schema(format!("cannot read Avro container {}: {}", path, e)))?;
    Ok(reader.writer_schema().clone())
}

fn value_to_avro(value: &RecordValue) -> AvroValue {
    match value {
        RecordValue::Null => AvroValue::Null,
        RecordValue::Bool(b) => AvroValue::Boolean(*b),
        RecordValue::Int(n) => AvroValue::Long(*n),
        RecordValue::Float(n) => AvroValue::Double(*n),
        RecordValue::Str(s) => AvroValue::String(s.clone()),
        RecordValue::Bytes(b) => AvroValue::Bytes(b.clone()),
        RecordValue::Array(items) => AvroValue::Array(items.iter().map(value_to_avro).collect()),
        RecordValue::Map(map) => AvroValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_avro(v)))
                .collect(),
        ),
    }
}

fn avro_to_value(value: AvroValue) -> Result<RecordValue> {
    Ok(match value {
        AvroValue::Null => RecordValue::Null,
        AvroValue::Boolean(b) => RecordValue::Bool(b),
        AvroValue::Int(n) => RecordValue::Int(n as i64),
        AvroValue::Long(n) => RecordValue::Int(n),
        AvroValue::Float(n) => RecordValue::Float(n as f64),
        AvroValue::Double(n) => RecordValue::Float(n),
        AvroValue::Bytes(b) => RecordValue::Bytes(b),
        AvroValue::Fixed(_, b) => RecordValue::Bytes(b),
        AvroValue::String(s) => RecordValue::Str(s),
        AvroValue::Enum(_, symbol) => RecordValue::Str(symbol),
        AvroValue::Union(_, inner) => avro_to_value(*inner)?,
        AvroValue::Array(items) => RecordValue::Array(
            items
                .into_iter()
                .map(avro_to_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        AvroValue::Map(map) => RecordValue::Map(
            map.into_iter()
                .map(|(k, v)| Ok((k, avro_to_value(v)?)))
                .collect::<Result<Record>>()?,
        ),
        AvroValue::Record(fields) => RecordValue::Map(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, avro_to_value(v)?)))
                .collect::<Result<Record>>()?,
        ),
        AvroValue::Date(d) => RecordValue::Int(d as i64),
        AvroValue::TimeMillis(t) => RecordValue::Int(t as i64),
        AvroValue::TimeMicros(t) => RecordValue::Int(t),
        AvroValue::TimestampMillis(t) => RecordValue::Int(t),
        AvroValue::TimestampMicros(t) => RecordValue::Int(t),
        AvroValue::Uuid(u) => RecordValue::Str(u.to_string()),
        other => {
            return Err(Error::Decode(format!(
                "unsupported Avro value: {:?}",
                other
            )))
        }
    })
}
