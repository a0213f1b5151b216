// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The block-accumulating output stream handed back from `open_write`/`atomic_write`. Buffers
//! writes up to one block and flushes each full block in its own small transaction — matching the
//! teacher's own segment writer, which flushes one compacted block at a time rather than holding
//! a single giant write buffered for the whole file.

use super::block::{encode_block, CompressionType};
use super::file_ref::{FileId, FileRef};
use crate::cache::{BlockCache, BlockCacheKey};
use crate::kv::Database;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::sync::Arc;
use tantivy::directory::AntiCallToken;
use tantivy::directory::TerminatingWrite;
use xxhash_rust::xxh3::xxh3_64;

/// Writes one file's blocks under `key_prefix` (the directory's subspace joined with the file id).
pub struct KvWriter {
    database: Arc<dyn Database>,
    cache: Arc<BlockCache>,
    runtime: tokio::runtime::Handle,
    dir_prefix: Vec<u8>,
    directory_hash: u64,
    file_id: FileId,
    block_size: u32,
    compression: CompressionType,
    buffer: Vec<u8>,
    next_block_no: u64,
    total_len: u64,
    finished: bool,
}

impl KvWriter {
    pub fn new(
        database: Arc<dyn Database>,
        cache: Arc<BlockCache>,
        runtime: tokio::runtime::Handle,
        dir_prefix: Vec<u8>,
        file_id: FileId,
        block_size: u32,
        compression: CompressionType,
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
            buffer: Vec::with_capacity(block_size as usize),
            next_block_no: 0,
            total_len: 0,
            finished: false,
        }
    }

    fn block_key(&self, block_no: u64) -> Vec<u8> {
        let mut key = super::metadata::block_prefix(&self.dir_prefix, self.file_id);
        key.extend_from_slice(&block_no.to_be_bytes());
        key
    }

    /// Flushes one full block of `self.buffer`, leaving any remainder (there should be none when
    /// called mid-stream, since we only call this once `buffer.len() >= block_size`).
    fn flush_block(&mut self, block: Vec<u8>) -> io::Result<()> {
        let block_no = self.next_block_no;
        let key = self.block_key(block_no);
        let encoded =
            encode_block(&block, self.compression).map_err(|err| io::Error::other(err.to_string()))?;

        let database = self.database.clone();
        let cache = self.cache.clone();
        let file_id = self.file_id;
        let directory = self.directory_hash;
        self.runtime
            .block_on(async move {
                let tx = database.create_transaction().await?;
                tx.set(key, encoded);
                tx.commit().await
            })
            .map_err(|err| io::Error::other(err.to_string()))?;

        cache.insert(
            BlockCacheKey { directory, file_id, block_no },
            Arc::new(block),
        );

        self.next_block_no += 1;
        Ok(())
    }
}

impl io::Write for KvWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        let mut remaining = buf;

        while !remaining.is_empty() {
            let room = self.block_size as usize - self.buffer.len();
            let take = room.min(remaining.len());
            self.buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            written += take;

            if self.buffer.len() == self.block_size as usize {
                let block = std::mem::replace(
                    &mut self.buffer,
                    Vec::with_capacity(self.block_size as usize),
                );
                self.flush_block(block)?;
            }
        }

        self.total_len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TerminatingWrite for KvWriter {
    fn terminate_ref(&mut self, _: AntiCallToken) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if !self.buffer.is_empty() {
            let block = std::mem::take(&mut self.buffer);
            self.flush_block(block)?;
        }

        let file_ref = FileRef {
            id: self.file_id,
            length: self.total_len,
            block_size: self.block_size,
            compression: self.compression,
        };

        super::metadata::put_file_ref(
            &self.runtime,
            &self.database,
            (&self.dir_prefix, self.file_id),
            &file_ref,
        )
        .map_err(|err| io::Error::other(err.to_string()))
    }
}
