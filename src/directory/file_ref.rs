// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The file reference entity (§3): immutable once created except for `length`, identified by a
//! 64-bit id assigned at creation.

use super::block::CompressionType;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub type FileId = u64;

#[derive(Clone, Debug)]
pub struct FileRef {
    pub id: FileId,
    pub length: u64,
    pub block_size: u32,
    pub compression: CompressionType,
}

impl FileRef {
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.length.div_ceil(u64::from(self.block_size))
    }
}

impl Encode for FileRef {
    fn encode_into<W: std::io::Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<BigEndian>(self.id)?;
        writer.write_u64::<BigEndian>(self.length)?;
        writer.write_u32::<BigEndian>(self.block_size)?;
        writer.write_u8(self.compression.as_tag())?;
        Ok(())
    }
}

impl Decode for FileRef {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let id = reader.read_u64::<BigEndian>()?;
        let length = reader.read_u64::<BigEndian>()?;
        let block_size = reader.read_u32::<BigEndian>()?;
        let tag = reader.read_u8()?;
        let compression = CompressionType::from_tag(tag).map_err(|_| {
            DecodeError::InvalidTag("CompressionType", u32::from(tag))
        })?;

        Ok(Self {
            id,
            length,
            block_size,
            compression,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_count_rounds_up() {
        let file_ref = FileRef {
            id: 1,
            length: 16_385,
            block_size: 16_384,
            compression: CompressionType::None,
        };
        assert_eq!(file_ref.block_count(), 2);
    }

    #[test]
    fn round_trip() {
        let file_ref = FileRef {
            id: 42,
            length: 1000,
            block_size: 4096,
            compression: CompressionType::None,
        };

        let mut buf = Vec::new();
        file_ref.encode_into(&mut buf).unwrap();
        let decoded = FileRef::decode_from(&mut &buf[..]).unwrap();

        assert_eq!(decoded.id, file_ref.id);
        assert_eq!(decoded.length, file_ref.length);
        assert_eq!(decoded.block_size, file_ref.block_size);
    }
}
