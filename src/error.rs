// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fmt;

/// The crate-wide error type.
///
/// Variants are grouped the way §7 of the design groups them: retriable conflicts, lost locks,
/// fatal invariant violations, bad input, I/O, and timeouts. Callers that want retry behavior
/// should match on [`Error::Conflict`] / [`Error::LockHeld`] specifically rather than treating
/// every error as terminal.
#[derive(Debug)]
pub enum Error {
    /// The underlying KV store reported a commit conflict; the caller may retry the transaction.
    Conflict,

    /// A directory lock is held by another entity and is not yet stale.
    LockHeld,

    /// We believed we held a directory lock but the heartbeat found it gone, stolen, or stale.
    AlreadyClosed,

    /// A partition's document count would go negative.
    NegativePartitionCount,

    /// Rebalancing could not find a boundary timestamp distinct from its neighbor.
    AmbiguousBoundary,

    /// A segment mixed synthetic and regular stored-field record types.
    MixedRecordTypes,

    /// The configured partitioning field name is missing or blank.
    MissingPartitionField,

    /// No file exists under the requested name.
    FileNotFound(String),

    /// A read went past the end of a virtual file.
    Eof,

    /// A stored field's numeric type did not match the schema (widening is forbidden).
    InvalidFieldType,

    /// A value read back from a block's trailer carried an unrecognized tag.
    InvalidTag(&'static str, u32),

    /// Decompression of a block failed under the given algorithm.
    Decompress(crate::directory::block::CompressionType),

    /// An operation did not complete before its deadline.
    Timeout,

    /// Wraps the underlying `tantivy` error for directory trait plumbing.
    Tantivy(String),

    /// Underlying I/O error.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "transaction conflict, retry"),
            Self::LockHeld => write!(f, "Lock failed: already locked by another entity"),
            Self::AlreadyClosed => write!(f, "lock lost: heartbeat detected foreign owner or staleness"),
            Self::NegativePartitionCount => write!(f, "partition count went negative"),
            Self::AmbiguousBoundary => write!(f, "repartition boundary is ambiguous"),
            Self::MixedRecordTypes => write!(f, "mixed synthetic and regular record types in one index"),
            Self::MissingPartitionField => write!(f, "partition field name is missing or blank"),
            Self::FileNotFound(name) => write!(f, "file not found: {name}"),
            Self::Eof => write!(f, "read past end of file"),
            Self::InvalidFieldType => write!(f, "stored field numeric type mismatch"),
            Self::InvalidTag(what, tag) => write!(f, "invalid {what} tag: {tag}"),
            Self::Decompress(algo) => write!(f, "failed to decompress block ({algo:?})"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Tantivy(msg) => write!(f, "tantivy: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(value: tantivy::TantivyError) -> Self {
        Self::Tantivy(value.to_string())
    }
}

impl From<crate::coding::DecodeError> for Error {
    fn from(value: crate::coding::DecodeError) -> Self {
        match value {
            crate::coding::DecodeError::Io(err) => Self::Io(err),
            crate::coding::DecodeError::InvalidTag(what, tag) => Self::InvalidTag(what, tag),
        }
    }
}

impl From<crate::coding::EncodeError> for Error {
    fn from(value: crate::coding::EncodeError) -> Self {
        match value {
            crate::coding::EncodeError::Io(err) => Self::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
