// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The stored-fields reader (§4.4 "Read path"): single-doc fetch plus a bulk range scan so a
//! segment-wide visitor doesn't pay one round trip per document.

use super::{doc_key, segment_range};
use super::record::Record;
use crate::coding::Decode;
use crate::kv::Database;
use std::sync::Arc;

/// Fetches one document's stored-fields record, or `None` if it was never written (or its segment
/// was merged away).
pub async fn get(
    database: &Arc<dyn Database>,
    prefix: &[u8],
    segment: &str,
    doc_id: u64,
) -> crate::Result<Option<Record>> {
    let tx = database.create_transaction().await?;
    let key = doc_key(prefix, segment, doc_id);
    match tx.get(&key).await? {
        Some(bytes) => Ok(Some(Record::decode_from(&mut &bytes[..])?)),
        None => Ok(None),
    }
}

/// Fetches every stored document in `segment`, ordered by doc id, in one range read.
pub async fn scan_range(
    database: &Arc<dyn Database>,
    prefix: &[u8],
    segment: &str,
) -> crate::Result<Vec<(u64, Record)>> {
    let tx = database.create_transaction().await?;
    let (begin, end) = segment_range(prefix, segment);
    let pairs = tx.get_range(begin.clone()..end).await?;

    let mut out = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        let doc_id_bytes = &key[begin.len()..];
        if doc_id_bytes.len() != 8 {
            continue;
        }
        let mut array = [0u8; 8];
        array.copy_from_slice(doc_id_bytes);
        let doc_id = u64::from_be_bytes(array);
        out.push((doc_id, Record::decode_from(&mut &value[..])?));
    }
    Ok(out)
}
