// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Production [`Database`]/[`Transaction`] backed by the real `foundationdb` client crate.
//! Requires the `fdb` feature (and a running cluster + `foundationdb::boot()` called once at
//! process start, which is the caller's responsibility — we don't call it here so embedders who
//! run several FDB-backed components in one process only boot the client once).

use super::{Database, KvPair, Transaction};
use async_trait::async_trait;
use foundationdb::options::MutationType;
use foundationdb::RangeOption;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};

pub struct FdbDatabase {
    inner: foundationdb::Database,
}

impl FdbDatabase {
    /// Opens a database handle from the default cluster file. Callers must have already called
    /// `foundationdb::boot()` (or equivalent) to initialize the client network thread.
    pub fn open() -> crate::Result<Self> {
        let inner = foundationdb::Database::default().map_err(|err| crate::Error::Io(
            std::io::Error::other(err.to_string()),
        ))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Database for FdbDatabase {
    async fn create_transaction(&self) -> crate::Result<Box<dyn Transaction>> {
        let tx = self
            .inner
            .create_trx()
            .map_err(|err| crate::Error::Io(std::io::Error::other(err.to_string())))?;
        Ok(Box::new(FdbTransaction {
            inner: Some(tx),
            bytes_written: AtomicU64::new(0),
        }))
    }
}

pub struct FdbTransaction {
    inner: Option<foundationdb::Transaction>,
    bytes_written: AtomicU64,
}

impl FdbTransaction {
    fn inner(&self) -> &foundationdb::Transaction {
        self.inner.as_ref().expect("transaction already committed")
    }
}

#[async_trait]
impl Transaction for FdbTransaction {
    async fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
        let value = self
            .inner()
            .get(key, false)
            .await
            .map_err(map_fdb_error)?;
        Ok(value.map(|slice| slice.to_vec()))
    }

    async fn get_range(&self, range: Range<Vec<u8>>) -> crate::Result<Vec<KvPair>> {
        let opt = RangeOption::from((range.start.as_slice(), range.end.as_slice()));
        let values = self
            .inner()
            .get_range(&opt, 1, false)
            .await
            .map_err(map_fdb_error)?;

        Ok(values
            .into_iter()
            .map(|kv| (kv.key().to_vec(), kv.value().to_vec()))
            .collect())
    }

    fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        self.bytes_written
            .fetch_add((key.len() + value.len()) as u64, SeqCst);
        self.inner().set(&key, &value);
    }

    fn clear(&self, key: &[u8]) {
        self.bytes_written.fetch_add(key.len() as u64, SeqCst);
        self.inner().clear(key);
    }

    fn clear_range(&self, range: Range<Vec<u8>>) {
        self.bytes_written
            .fetch_add((range.start.len() + range.end.len()) as u64, SeqCst);
        self.inner().clear_range(&range.start, &range.end);
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(SeqCst)
    }

    async fn commit(mut self: Box<Self>) -> crate::Result<()> {
        let tx = self.inner.take().expect("transaction already committed");
        tx.commit().await.map_err(|err| {
            if err.is_retryable() {
                crate::Error::Conflict
            } else {
                crate::Error::Io(std::io::Error::other(err.to_string()))
            }
        })?;
        Ok(())
    }
}

fn map_fdb_error(err: foundationdb::FdbError) -> crate::Error {
    if err.is_retryable() {
        crate::Error::Conflict
    } else {
        crate::Error::Io(std::io::Error::other(err.to_string()))
    }
}

/// Allocates a fresh file-id via an atomic KV increment (extension to §3: the index-level
/// metadata subspace's file-id counter), using FDB's native `add` mutation so concurrent openers
/// of the same group never collide without a read-modify-write round trip.
pub fn bump_file_id_mutation(tx: &foundationdb::Transaction, counter_key: &[u8]) {
    let delta: [u8; 8] = 1i64.to_le_bytes();
    tx.atomic_op(counter_key, &delta, MutationType::Add);
}
