// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Partition metadata (§3 "Partition meta"): `{id, count, from, to}`, keyed in the KV store by its
//! own `from` value so a range scan over the meta subspace visits partitions oldest-first.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub type PartitionId = i32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionMeta {
    pub id: PartitionId,
    pub count: i64,
    pub from: i64,
    pub to: i64,
}

impl PartitionMeta {
    #[must_use]
    pub fn contains(&self, ts: i64) -> bool {
        self.from <= ts && ts <= self.to
    }
}

impl Encode for PartitionMeta {
    fn encode_into<W: std::io::Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i32::<BigEndian>(self.id)?;
        writer.write_i64::<BigEndian>(self.count)?;
        writer.write_i64::<BigEndian>(self.from)?;
        writer.write_i64::<BigEndian>(self.to)?;
        Ok(())
    }
}

impl Decode for PartitionMeta {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            id: reader.read_i32::<BigEndian>()?,
            count: reader.read_i64::<BigEndian>()?,
            from: reader.read_i64::<BigEndian>()?,
            to: reader.read_i64::<BigEndian>()?,
        })
    }
}

/// Packs `from` into the order-preserving key suffix used for the partition meta subspace.
#[must_use]
pub fn meta_key_suffix(from: i64) -> Vec<u8> {
    crate::tuple::Tuple::new().push(from).pack()
}
