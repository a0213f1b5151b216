// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The stored-fields writer (§4.4 "Write path"): one KV put per document, with outstanding async
//! writes bounded by a small queue so a burst of `finishDocument` calls doesn't unboundedly fan out
//! concurrent transactions.

use super::{doc_key, segment_range};
use crate::coding::Encode;
use crate::kv::Database;
use crate::metrics::Metrics;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct StoredFieldsWriter {
    database: Arc<dyn Database>,
    prefix: Vec<u8>,
    segment: String,
    next_doc_id: u64,
    outstanding: VecDeque<JoinHandle<crate::Result<()>>>,
    max_outstanding: usize,
    metrics: Option<Arc<Metrics>>,
}

impl StoredFieldsWriter {
    #[must_use]
    pub fn new(database: Arc<dyn Database>, prefix: Vec<u8>, segment: String, max_outstanding: usize) -> Self {
        Self {
            database,
            prefix,
            segment,
            next_doc_id: 0,
            outstanding: VecDeque::new(),
            max_outstanding: max_outstanding.max(1),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Like [`Self::new`], but recovers `next_doc_id` from whatever is already persisted for this
    /// `(prefix, segment)` instead of assuming an empty segment. Needed because this writer's doc
    /// id counter is otherwise process-local: without this, a process restart would start handing
    /// out doc ids from 0 again and collide with records a prior process already wrote.
    pub async fn resume(
        database: Arc<dyn Database>,
        prefix: Vec<u8>,
        segment: String,
        max_outstanding: usize,
    ) -> crate::Result<Self> {
        let next_doc_id = highest_doc_id(&database, &prefix, &segment).await?.map_or(0, |id| id + 1);
        Ok(Self {
            database,
            prefix,
            segment,
            next_doc_id,
            outstanding: VecDeque::new(),
            max_outstanding: max_outstanding.max(1),
            metrics: None,
        })
    }

    /// Writes the next document's record (docs are assigned contiguous ids `0..N-1` within one
    /// segment, per §3's invariant), awaiting backpressure if the outstanding-write queue is full.
    /// Returns the doc id assigned, so a caller that needs to look the record up again later
    /// (e.g. by primary key) can remember it.
    pub async fn write(&mut self, record: &super::Record) -> crate::Result<u64> {
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;
        self.enqueue_write(doc_id, record).await?;
        Ok(doc_id)
    }

    /// Rewrites the record already at `doc_id`, used when an update reuses a previously-assigned
    /// id instead of appending a new one. Does not touch the next-id counter.
    pub async fn overwrite(&mut self, doc_id: u64, record: &super::Record) -> crate::Result<()> {
        self.enqueue_write(doc_id, record).await
    }

    async fn enqueue_write(&mut self, doc_id: u64, record: &super::Record) -> crate::Result<()> {
        record.validate_no_widening()?;

        let key = doc_key(&self.prefix, &self.segment, doc_id);
        let encoded = record.encode_to_vec()?;
        let bytes_written = (key.len() + encoded.len()) as u64;

        let database = self.database.clone();
        let handle = tokio::spawn(async move {
            let tx = database.create_transaction().await?;
            tx.set(key, encoded);
            tx.commit().await
        });
        self.outstanding.push_back(handle);

        if let Some(metrics) = &self.metrics {
            metrics.record_write_stored_fields(bytes_written);
        }

        if self.outstanding.len() >= self.max_outstanding {
            self.await_oldest().await?;
        }

        Ok(())
    }

    /// Drains every in-flight write, surfacing the first error encountered.
    pub async fn finish(&mut self) -> crate::Result<()> {
        while !self.outstanding.is_empty() {
            self.await_oldest().await?;
        }
        Ok(())
    }

    async fn await_oldest(&mut self) -> crate::Result<()> {
        if let Some(handle) = self.outstanding.pop_front() {
            handle
                .await
                .map_err(|err| crate::Error::Io(std::io::Error::other(err.to_string())))??;
        }
        Ok(())
    }

    #[must_use]
    pub fn doc_count(&self) -> u64 {
        self.next_doc_id
    }
}

/// Highest doc id already persisted under `(prefix, segment)`, or `None` if it's empty. One full
/// range scan, same shape as [`super::reader::scan_range`] — there's no reverse-range primitive on
/// [`crate::kv::Transaction`] to find just the last key cheaply.
async fn highest_doc_id(database: &Arc<dyn Database>, prefix: &[u8], segment: &str) -> crate::Result<Option<u64>> {
    let tx = database.create_transaction().await?;
    let (begin, end) = segment_range(prefix, segment);
    let pairs = tx.get_range(begin.clone()..end).await?;

    let mut highest = None;
    for (key, _) in pairs {
        let doc_id_bytes = &key[begin.len()..];
        if doc_id_bytes.len() != 8 {
            continue;
        }
        let mut array = [0u8; 8];
        array.copy_from_slice(doc_id_bytes);
        let doc_id = u64::from_be_bytes(array);
        highest = Some(highest.map_or(doc_id, |h: u64| h.max(doc_id)));
    }
    Ok(highest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryDatabase;
    use crate::stored_fields::record::FieldValue;
    use crate::stored_fields::Record;

    #[tokio::test]
    async fn writes_are_assigned_contiguous_doc_ids() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let mut writer = StoredFieldsWriter::new(database.clone(), b"p/".to_vec(), "seg".to_owned(), 2);

        let mut record = Record::new();
        record.push(1, FieldValue::Int32(7));

        for _ in 0..5 {
            writer.write(&record).await.unwrap();
        }
        writer.finish().await.unwrap();

        assert_eq!(writer.doc_count(), 5);
        for doc_id in 0..5 {
            assert!(super::super::reader::get(&database, b"p/", "seg", doc_id)
                .await
                .unwrap()
                .is_some());
        }
    }

    #[tokio::test]
    async fn resume_continues_after_existing_docs() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let mut record = Record::new();
        record.push(1, FieldValue::Int32(7));

        {
            let mut writer = StoredFieldsWriter::new(database.clone(), b"p/".to_vec(), "seg".to_owned(), 2);
            for _ in 0..3 {
                writer.write(&record).await.unwrap();
            }
            writer.finish().await.unwrap();
        }

        let mut resumed = StoredFieldsWriter::resume(database.clone(), b"p/".to_vec(), "seg".to_owned(), 2)
            .await
            .unwrap();
        let next_id = resumed.write(&record).await.unwrap();
        resumed.finish().await.unwrap();

        assert_eq!(next_id, 3);
        assert!(super::super::reader::get(&database, b"p/", "seg", 3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resume_starts_at_zero_for_empty_segment() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let mut writer = StoredFieldsWriter::resume(database, b"p/".to_vec(), "seg".to_owned(), 2)
            .await
            .unwrap();
        assert_eq!(writer.doc_count(), 0);
    }

    #[tokio::test]
    async fn backpressure_caps_outstanding_writes() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let mut writer = StoredFieldsWriter::new(database, b"p/".to_vec(), "seg".to_owned(), 3);

        let mut record = Record::new();
        record.push(1, FieldValue::Int32(1));

        for _ in 0..10 {
            writer.write(&record).await.unwrap();
            assert!(writer.outstanding.len() <= 3);
        }
        writer.finish().await.unwrap();
        assert!(writer.outstanding.is_empty());
    }
}
