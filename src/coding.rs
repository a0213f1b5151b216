// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Small `Encode`/`Decode` traits used for the binary structures persisted into KV values
//! (block headers, file references, partition metas, stored-field records).

use std::io::{Read, Write};

#[derive(Debug)]
pub enum EncodeError {
    Io(std::io::Error),
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug)]
pub enum DecodeError {
    Io(std::io::Error),
    InvalidTag(&'static str, u32),
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

pub trait Encode {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    fn encode_to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }
}

pub trait Decode {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}
