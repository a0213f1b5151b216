// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The `FileHandle` implementation returned from `get_file_handle`: maps a byte offset to a
//! block number by integer division, consults the block cache (C2) first, and falls back to a KV
//! fetch + decompress on a miss.

use super::block::{decode_block, CompressionType};
use super::file_ref::FileId;
use crate::cache::{BlockCache, BlockCacheKey};
use crate::kv::Database;
use std::ops::Range;
use std::sync::Arc;
use tantivy::directory::{FileHandle, OwnedBytes};
use tantivy::HasLen;
use xxhash_rust::xxh3::xxh3_64;

pub struct KvFileHandle {
    database: Arc<dyn Database>,
    cache: Arc<BlockCache>,
    runtime: tokio::runtime::Handle,
    dir_prefix: Vec<u8>,
    directory_hash: u64,
    file_id: FileId,
    block_size: u32,
    compression: CompressionType,
    length: u64,
}

impl KvFileHandle {
    pub fn new(
        database: Arc<dyn Database>,
        cache: Arc<BlockCache>,
        runtime: tokio::runtime::Handle,
        dir_prefix: Vec<u8>,
        file_id: FileId,
        block_size: u32,
        compression: CompressionType,
        length: u64,
    ) -> Self {
        let directory_hash = xxh3_64(&dir_prefix);
        Self {
            database,
            cache,
            runtime,
            dir_prefix,
            directory_hash,
            file_id,
            block_size,
            compression,
            length,
        }
    }

    /// Fetches one decoded block, checking the cache first.
    fn read_block(&self, block_no: u64) -> std::io::Result<Arc<Vec<u8>>> {
        let cache_key = BlockCacheKey {
            directory: self.directory_hash,
            file_id: self.file_id,
            block_no,
        };

        if let Some(cached) = self.cache.get(cache_key) {
            return Ok(cached);
        }

        let mut key = super::metadata::block_prefix(&self.dir_prefix, self.file_id);
        key.extend_from_slice(&block_no.to_be_bytes());

        let database = self.database.clone();
        let raw = self
            .runtime
            .block_on(async move {
                let tx = database.create_transaction().await?;
                tx.get(&key).await
            })
            .map_err(|err| std::io::Error::other(err.to_string()))?
            .ok_or_else(|| std::io::Error::other("missing block"))?;

        let decoded = decode_block(&raw, self.compression)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        let decoded = Arc::new(decoded);
        self.cache.insert(cache_key, decoded.clone());
        Ok(decoded)
    }
}

impl std::fmt::Debug for KvFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvFileHandle")
            .field("file_id", &self.file_id)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl HasLen for KvFileHandle {
    fn len(&self) -> usize {
        self.length as usize
    }
}

impl FileHandle for KvFileHandle {
    fn read_bytes(&self, range: Range<usize>) -> std::io::Result<OwnedBytes> {
        if range.end as u64 > self.length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read range {range:?} exceeds file length {}",
                    self.length
                ),
            ));
        }

        let block_size = self.block_size as u64;
        let mut out = Vec::with_capacity(range.end - range.start);
        let mut offset = range.start as u64;
        let end = range.end as u64;

        while offset < end {
            let block_no = offset / block_size;
            let block_offset = (offset % block_size) as usize;
            let block = self.read_block(block_no)?;

            let block_end = ((block_no + 1) * block_size).min(end);
            let take_end = block_offset + (block_end - offset) as usize;
            out.extend_from_slice(&block[block_offset..take_end.min(block.len())]);

            offset = block_end;
        }

        Ok(OwnedBytes::new(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::block::encode_block;
    use crate::kv::memory::MemoryDatabase;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn reads_span_multiple_blocks() {
        let rt = runtime();
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let cache = Arc::new(BlockCache::with_capacity_bytes(1_000_000));
        let dir_prefix = b"dir/".to_vec();
        let file_id = 1;
        let block_size = 4u32;

        let blocks = [b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()];
        rt.block_on(async {
            let tx = database.create_transaction().await.unwrap();
            for (i, block) in blocks.iter().enumerate() {
                let mut key = super::super::metadata::block_prefix(&dir_prefix, file_id);
                key.extend_from_slice(&(i as u64).to_be_bytes());
                let encoded = encode_block(block, CompressionType::None).unwrap();
                tx.set(key, encoded);
            }
            tx.commit().await.unwrap();
        });

        let handle = KvFileHandle::new(
            database,
            cache,
            rt.handle().clone(),
            dir_prefix,
            file_id,
            block_size,
            CompressionType::None,
            10,
        );

        let bytes = handle.read_bytes(2..9).unwrap();
        assert_eq!(bytes.as_slice(), b"cdefghi");
    }

    #[test]
    fn read_past_end_of_file_errors() {
        let rt = runtime();
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let cache = Arc::new(BlockCache::with_capacity_bytes(1_000_000));

        let handle = KvFileHandle::new(
            database,
            cache,
            rt.handle().clone(),
            b"dir/".to_vec(),
            1,
            4,
            CompressionType::None,
            4,
        );

        assert!(handle.read_bytes(0..10).is_err());
    }
}
