// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The stored-fields record (§3 "Stored-fields record", §4.4): a length-delimited list of typed
//! `(fieldNumber, value)` pairs, one record per document per segment.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub type FieldNumber = u32;

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
    String(String),
}

const TAG_INT32: u8 = 0;
const TAG_INT64: u8 = 1;
const TAG_FLOAT32: u8 = 2;
const TAG_FLOAT64: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_STRING: u8 = 5;

impl FieldValue {
    fn tag(&self) -> u8 {
        match self {
            Self::Int32(_) => TAG_INT32,
            Self::Int64(_) => TAG_INT64,
            Self::Float32(_) => TAG_FLOAT32,
            Self::Float64(_) => TAG_FLOAT64,
            Self::Bytes(_) => TAG_BYTES,
            Self::String(_) => TAG_STRING,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub number: FieldNumber,
    pub value: FieldValue,
}

/// One document's stored fields, in insertion order (re-widening a field's numeric type across
/// calls is a caller bug, not something this type enforces per-call — `Record::push` is the single
/// append point and leaves widening detection to [`Record::validate_no_widening`]).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<Field>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, number: FieldNumber, value: FieldValue) {
        self.fields.push(Field { number, value });
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Fails with [`crate::Error::MixedRecordTypes`] if the same field number appears twice with
    /// a different value tag — numeric widening is forbidden (§4.4 invariants).
    pub fn validate_no_widening(&self) -> crate::Result<()> {
        let mut seen: std::collections::HashMap<FieldNumber, u8> = std::collections::HashMap::new();
        for field in &self.fields {
            let tag = field.value.tag();
            match seen.get(&field.number) {
                Some(&previous) if previous != tag => return Err(crate::Error::MixedRecordTypes),
                _ => {
                    seen.insert(field.number, tag);
                }
            }
        }
        Ok(())
    }
}

impl Encode for Record {
    fn encode_into<W: std::io::Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<BigEndian>(self.fields.len() as u32)?;
        for field in &self.fields {
            writer.write_u32::<BigEndian>(field.number)?;
            writer.write_u8(field.value.tag())?;
            match &field.value {
                FieldValue::Int32(v) => writer.write_i32::<BigEndian>(*v)?,
                FieldValue::Int64(v) => writer.write_i64::<BigEndian>(*v)?,
                FieldValue::Float32(v) => writer.write_f32::<BigEndian>(*v)?,
                FieldValue::Float64(v) => writer.write_f64::<BigEndian>(*v)?,
                FieldValue::Bytes(bytes) => {
                    writer.write_u32::<BigEndian>(bytes.len() as u32)?;
                    writer.write_all(bytes)?;
                }
                FieldValue::String(s) => {
                    writer.write_u32::<BigEndian>(s.len() as u32)?;
                    writer.write_all(s.as_bytes())?;
                }
            }
        }
        Ok(())
    }
}

impl Decode for Record {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let count = reader.read_u32::<BigEndian>()?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let number = reader.read_u32::<BigEndian>()?;
            let tag = reader.read_u8()?;
            let value = match tag {
                TAG_INT32 => FieldValue::Int32(reader.read_i32::<BigEndian>()?),
                TAG_INT64 => FieldValue::Int64(reader.read_i64::<BigEndian>()?),
                TAG_FLOAT32 => FieldValue::Float32(reader.read_f32::<BigEndian>()?),
                TAG_FLOAT64 => FieldValue::Float64(reader.read_f64::<BigEndian>()?),
                TAG_BYTES => {
                    let len = reader.read_u32::<BigEndian>()?;
                    let mut bytes = vec![0u8; len as usize];
                    reader.read_exact(&mut bytes)?;
                    FieldValue::Bytes(bytes)
                }
                TAG_STRING => {
                    let len = reader.read_u32::<BigEndian>()?;
                    let mut bytes = vec![0u8; len as usize];
                    reader.read_exact(&mut bytes)?;
                    let s = String::from_utf8(bytes)
                        .map_err(|_| DecodeError::InvalidTag("stored-field-string", 0))?;
                    FieldValue::String(s)
                }
                other => return Err(DecodeError::InvalidTag("stored-field", u32::from(other))),
            };
            fields.push(Field { number, value });
        }
        Ok(Self { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_mixed_fields() {
        let mut record = Record::new();
        record.push(1, FieldValue::Int32(42));
        record.push(2, FieldValue::String("hello".to_owned()));
        record.push(3, FieldValue::Bytes(vec![1, 2, 3]));
        record.push(4, FieldValue::Float64(3.25));

        let encoded = record.encode_to_vec().unwrap();
        let decoded = Record::decode_from(&mut &encoded[..]).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn widened_type_is_rejected() {
        let mut record = Record::new();
        record.push(1, FieldValue::Int32(1));
        record.push(1, FieldValue::Int64(2));
        assert!(matches!(
            record.validate_no_widening(),
            Err(crate::Error::MixedRecordTypes)
        ));
    }

    #[test]
    fn repeated_same_type_is_allowed() {
        let mut record = Record::new();
        record.push(1, FieldValue::Int32(1));
        record.push(1, FieldValue::Int32(2));
        assert!(record.validate_no_widening().is_ok());
    }

    #[test]
    fn empty_record_round_trips() {
        let record = Record::new();
        let encoded = record.encode_to_vec().unwrap();
        let decoded = Record::decode_from(&mut &encoded[..]).unwrap();
        assert_eq!(record, decoded);
    }
}
