// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The stored-fields codec (C4): replaces tantivy's default file-based stored-fields format with
//! one KV put per document, keyed by `(segment name, doc id)`.

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{get, scan_range};
pub use record::{Field, FieldNumber, FieldValue, Record};
pub use writer::StoredFieldsWriter;

use crate::kv::Database;
use std::sync::Arc;

/// Default cap on in-flight async writes per [`StoredFieldsWriter`] before backpressure kicks in.
pub const DEFAULT_OUTSTANDING_WRITES: usize = 20;

fn doc_key(prefix: &[u8], segment: &str, doc_id: u64) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(segment.as_bytes());
    key.push(0);
    key.extend_from_slice(&doc_id.to_be_bytes());
    key
}

fn segment_range(prefix: &[u8], segment: &str) -> (Vec<u8>, Vec<u8>) {
    let mut begin = prefix.to_vec();
    begin.extend_from_slice(segment.as_bytes());
    begin.push(0);
    let mut end = begin.clone();
    end.push(0xFF);
    (begin, end)
}

/// Clears every stored-fields record for `segment` in one range op, used when a segment is merged
/// away (§4.4 "Delete path"). Doc-level deletes only flip a liveness tombstone elsewhere and never
/// call this.
pub async fn delete_segment(database: &Arc<dyn Database>, prefix: &[u8], segment: &str) -> crate::Result<()> {
    let tx = database.create_transaction().await?;
    let (begin, end) = segment_range(prefix, segment);
    tx.clear_range(begin..end);
    tx.commit().await
}

/// Clears a single document's stored-fields record, used on a genuine doc-level delete (as
/// opposed to [`delete_segment`]'s whole-segment sweep on merge).
pub async fn delete(database: &Arc<dyn Database>, prefix: &[u8], segment: &str, doc_id: u64) -> crate::Result<()> {
    let tx = database.create_transaction().await?;
    tx.clear(&doc_key(prefix, segment, doc_id));
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryDatabase;
    use record::FieldValue;

    #[tokio::test]
    async fn delete_segment_clears_all_docs() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let prefix = b"p/".to_vec();

        let mut writer = StoredFieldsWriter::new(database.clone(), prefix.clone(), "seg1".to_owned(), 4);
        let mut record = Record::new();
        record.push(1, FieldValue::Int32(1));
        writer.write(&record).await.unwrap();
        writer.write(&record).await.unwrap();
        writer.finish().await.unwrap();

        assert!(reader::get(&database, &prefix, "seg1", 0).await.unwrap().is_some());

        delete_segment(&database, &prefix, "seg1").await.unwrap();
        assert!(reader::get(&database, &prefix, "seg1", 0).await.unwrap().is_none());
        assert!(reader::get(&database, &prefix, "seg1", 1).await.unwrap().is_none());
    }
}
