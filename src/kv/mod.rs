// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The transactional KV abstraction this crate is built on. `Database`/`Transaction` model a
//! FoundationDB-shaped store: serializable read/write transactions keyed by byte ranges. The
//! `fdb` feature wires the real `foundationdb` client; `memory-kv` (default, for tests and
//! embedding without a cluster) provides an in-process stand-in with the same contract, the way
//! `tantivy` itself ships both `MmapDirectory` and `RamDirectory` against one `Directory` trait.

#[cfg(feature = "memory-kv")]
pub mod memory;

#[cfg(feature = "fdb")]
pub mod fdb;

use async_trait::async_trait;
use std::ops::Range;

/// A key-value pair returned from a range read.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// A single serializable read/write transaction against the KV store.
///
/// Implementations must provide snapshot isolation within the transaction (reads observe prior
/// writes in the same transaction) and must surface [`crate::Error::Conflict`] from [`commit`]
/// when the underlying store detects a conflicting concurrent writer.
///
/// [`commit`]: Transaction::commit
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>>;

    /// Reads every key in `range` in one round trip, sorted by key.
    async fn get_range(&self, range: Range<Vec<u8>>) -> crate::Result<Vec<KvPair>>;

    fn set(&self, key: Vec<u8>, value: Vec<u8>);

    fn clear(&self, key: &[u8]);

    fn clear_range(&self, range: Range<Vec<u8>>);

    /// Total key+value bytes written so far in this transaction, used by the agility context
    /// (C5) to evaluate its size quota.
    fn bytes_written(&self) -> u64;

    /// Commits the transaction. Consumes `self` because a transaction is single-use once
    /// committed, matching the real FoundationDB binding's `commit(self)` signature.
    async fn commit(self: Box<Self>) -> crate::Result<()>;
}

/// Opens new [`Transaction`]s. A `Database` is process-wide and cheaply cloned (an `Arc` around a
/// connection handle in the `fdb` backend).
#[async_trait]
pub trait Database: Send + Sync {
    async fn create_transaction(&self) -> crate::Result<Box<dyn Transaction>>;
}
