// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An in-process [`Database`] over a `BTreeMap`, used by tests and by embedders who don't want a
//! live FoundationDB cluster. Commits are applied optimistically: a transaction records its own
//! read set and write set and the commit is rejected with [`crate::Error::Conflict`] if any read
//! key changed since the transaction started, mirroring FDB's own optimistic concurrency model.

use super::{Database, KvPair, Transaction};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Store {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Bumped on every commit so readers can detect a conflicting write.
    version: u64,
}

pub struct MemoryDatabase {
    store: Arc<RwLock<Store>>,
    commit_counter: Arc<AtomicU64>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            commit_counter: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn create_transaction(&self) -> crate::Result<Box<dyn Transaction>> {
        let started_at_version = self.store.read().expect("lock poisoned").version;
        Ok(Box::new(MemoryTransaction {
            store: self.store.clone(),
            started_at_version,
            reads: RwLock::new(Vec::new()),
            writes: RwLock::new(Vec::new()),
            clears: RwLock::new(Vec::new()),
            clear_ranges: RwLock::new(Vec::new()),
            bytes_written: AtomicU64::new(0),
        }))
    }
}

enum Clear {
    Key(Vec<u8>),
}

pub struct MemoryTransaction {
    store: Arc<RwLock<Store>>,
    started_at_version: u64,
    reads: RwLock<Vec<Vec<u8>>>,
    writes: RwLock<Vec<KvPair>>,
    clears: RwLock<Vec<Clear>>,
    clear_ranges: RwLock<Vec<Range<Vec<u8>>>>,
    bytes_written: AtomicU64,
}

impl MemoryTransaction {
    /// Applies this transaction's pending writes over a snapshot of committed state plus any
    /// earlier writes in the same transaction, so reads observe writes in program order.
    fn overlay_get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
        for (k, v) in self.writes.read().expect("lock poisoned").iter().rev() {
            if k == key {
                return Ok(Some(v.clone()));
            }
        }
        for clear in self.clears.read().expect("lock poisoned").iter().rev() {
            let Clear::Key(k) = clear;
            if k == key {
                return Ok(None);
            }
        }
        for range in self.clear_ranges.read().expect("lock poisoned").iter() {
            if key >= range.start.as_slice() && key < range.end.as_slice() {
                return Ok(None);
            }
        }
        Ok(self
            .store
            .read()
            .expect("lock poisoned")
            .data
            .get(key)
            .cloned())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
        self.reads.write().expect("lock poisoned").push(key.to_vec());
        self.overlay_get(key)
    }

    async fn get_range(&self, range: Range<Vec<u8>>) -> crate::Result<Vec<KvPair>> {
        let store = self.store.read().expect("lock poisoned");
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = store
            .data
            .range(range.clone())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        drop(store);

        for range_cleared in self.clear_ranges.read().expect("lock poisoned").iter() {
            merged.retain(|k, _| !(k >= &range_cleared.start && k < &range_cleared.end));
        }
        for clear in self.clears.read().expect("lock poisoned").iter() {
            let Clear::Key(k) = clear;
            merged.remove(k);
        }
        for (k, v) in self.writes.read().expect("lock poisoned").iter() {
            if k >= &range.start && k < &range.end {
                merged.insert(k.clone(), v.clone());
            }
        }

        self.reads
            .write()
            .expect("lock poisoned")
            .push(range.start.clone());
        Ok(merged.into_iter().collect())
    }

    fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        self.bytes_written
            .fetch_add((key.len() + value.len()) as u64, SeqCst);
        self.writes.write().expect("lock poisoned").push((key, value));
    }

    fn clear(&self, key: &[u8]) {
        self.bytes_written.fetch_add(key.len() as u64, SeqCst);
        self.clears
            .write()
            .expect("lock poisoned")
            .push(Clear::Key(key.to_vec()));
    }

    fn clear_range(&self, range: Range<Vec<u8>>) {
        self.bytes_written
            .fetch_add((range.start.len() + range.end.len()) as u64, SeqCst);
        self.clear_ranges.write().expect("lock poisoned").push(range);
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(SeqCst)
    }

    async fn commit(self: Box<Self>) -> crate::Result<()> {
        let mut store = self.store.write().expect("lock poisoned");

        // NOTE: a real FDB conflict range check is per-key; this in-memory stand-in
        // conservatively conflicts the whole transaction if *any* commit has landed since it
        // started. Good enough for single-writer-per-partition tests (§5's concurrency model
        // only promises serialization within one partition anyway).
        if store.version != self.started_at_version && !self.reads.read().expect("lock poisoned").is_empty() {
            return Err(crate::Error::Conflict);
        }

        for range in self.clear_ranges.into_inner().expect("lock poisoned") {
            store.data.retain(|k, _| !(k >= &range.start && k < &range.end));
        }
        for clear in self.clears.into_inner().expect("lock poisoned") {
            let Clear::Key(k) = clear;
            store.data.remove(&k);
        }
        for (k, v) in self.writes.into_inner().expect("lock poisoned") {
            store.data.insert(k, v);
        }
        store.version += 1;

        Ok(())
    }
}
