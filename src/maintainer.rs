// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The index maintainer (C8): the glue tying every other component together into one
//! `(group, partition)`-scoped `tantivy::IndexWriter` per logical sub-index.
//!
//! On each record op the maintainer: computes which partition the document belongs to via C7,
//! obtains that partition's cached `(KvDirectory, Index, IndexWriter, StoredFieldsWriter)`
//! quadruple, writes the document's postings through `tantivy::IndexWriter` (C1) and its stored
//! content through C4's own KV-keyed codec (independent of whatever tantivy's schema itself marks
//! `STORED`). Merge and repartition drive their own bookkeeping writes through an
//! [`crate::agile::AgilityContext`] (C5) under the same directory lock (C6) that serializes
//! ordinary writes. Every call into `tantivy::IndexWriter` runs inside `tokio::task::spawn_blocking`,
//! which is what makes the `block_on` bridge in [`crate::directory`] safe: the synchronous
//! `Directory` calls tantivy makes always land on a blocking-pool thread, never a worker thread
//! driving other async work on the same runtime.

use crate::agile::AgilityContext;
use crate::cache::BlockCache;
use crate::config::Config;
use crate::kv::Database;
use crate::lazy::{Closeable, LazyHandle};
use crate::lock::FileLock;
use crate::metrics::Metrics;
use crate::partition::rebalance::{rebalance_group, DocTimestamps, RebalanceStats};
use crate::partition::{PartitionId, PartitionTable};
use crate::stored_fields::{Record, StoredFieldsWriter};
use crate::tuple::Tuple;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::TermQuery;
use tantivy::schema::{Field, IndexRecordOption, Schema};
use tantivy::{Index, IndexWriter, TantivyDocument, Term};
use tokio::sync::RwLock;

const PARTITION_DATA_TAG: u8 = 1;
const TIMESTAMP_INDEX_TAG: u8 = 2;
const STORED_FIELDS_TAG: u8 = 3;
const PK_DOC_ID_TAG: u8 = 4;
const MERGE_MARKER_TAG: u8 = 5;

/// The logical C4 "segment" every document in a partition is stored under. Unlike tantivy's own
/// segments, this name never changes across merges, since C4's KV-keyed records live in their own
/// subspace and have no reason to churn along with tantivy's physical segment files.
const STORED_FIELDS_SEGMENT: &str = "docs";

fn partition_directory_prefix(group_prefix: &[u8], partition: PartitionId) -> Vec<u8> {
    let mut key = group_prefix.to_vec();
    key.push(PARTITION_DATA_TAG);
    key.extend_from_slice(&partition.to_be_bytes());
    key
}

fn timestamp_index_prefix(group_prefix: &[u8], partition: PartitionId) -> Vec<u8> {
    let mut key = group_prefix.to_vec();
    key.push(TIMESTAMP_INDEX_TAG);
    key.extend_from_slice(&partition.to_be_bytes());
    key
}

fn stored_fields_prefix(group_prefix: &[u8], partition: PartitionId) -> Vec<u8> {
    let mut key = group_prefix.to_vec();
    key.push(STORED_FIELDS_TAG);
    key.extend_from_slice(&partition.to_be_bytes());
    key
}

fn pk_doc_id_key(group_prefix: &[u8], partition: PartitionId, primary_key: &[u8]) -> Vec<u8> {
    let mut key = group_prefix.to_vec();
    key.push(PK_DOC_ID_TAG);
    key.extend_from_slice(&partition.to_be_bytes());
    key.extend_from_slice(primary_key);
    key
}

fn merge_marker_key(group_prefix: &[u8], partition: PartitionId) -> Vec<u8> {
    let mut key = group_prefix.to_vec();
    key.push(MERGE_MARKER_TAG);
    key.extend_from_slice(&partition.to_be_bytes());
    key
}

fn timestamp_index_key(group_prefix: &[u8], partition: PartitionId, ts: i64, primary_key: &[u8]) -> Vec<u8> {
    let mut key = timestamp_index_prefix(group_prefix, partition);
    key.extend_from_slice(&Tuple::new().push(ts).pack());
    key.extend_from_slice(primary_key);
    key
}

/// One directory lock (C6) per `(group, partition)`, serializing every writer — ordinary
/// document writes and merge passes alike — against that partition (§5 "Per-directory state").
fn directory_lock_key(group_prefix: &[u8], partition: PartitionId) -> Vec<u8> {
    let mut key = group_prefix.to_vec();
    key.push(b'l');
    key.extend_from_slice(&partition.to_be_bytes());
    key
}

#[cfg(feature = "lz4")]
fn compression_for(config: &Config) -> crate::directory::block::CompressionType {
    if config.index_compression_enabled {
        crate::directory::block::CompressionType::Lz4
    } else {
        crate::directory::block::CompressionType::None
    }
}

#[cfg(not(feature = "lz4"))]
fn compression_for(_config: &Config) -> crate::directory::block::CompressionType {
    crate::directory::block::CompressionType::None
}

fn spawn_blocking_result<F, T>(
    runtime: &tokio::runtime::Handle,
    f: F,
) -> impl std::future::Future<Output = crate::Result<T>> + Send + 'static
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = runtime.spawn_blocking(f);
    async move {
        handle
            .await
            .map_err(|err| crate::Error::Io(std::io::Error::other(err.to_string())))?
    }
}

/// One `(group, partition)`'s open directory, index, writer and stored-fields writer. Cached
/// behind a [`LazyHandle`] so concurrent first-touches coalesce onto a single
/// `Index::open_or_create`.
struct PartitionHandle {
    index: Index,
    writer: std::sync::Mutex<IndexWriter>,
    stored_fields: tokio::sync::Mutex<StoredFieldsWriter>,
}

#[async_trait::async_trait]
impl Closeable for PartitionHandle {
    async fn close(&self) {
        // Best-effort: a maintainer shutting down a partition wants its pending writes durable,
        // but there is no caller left to report a commit failure to.
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.commit();
        }
        let _ = self.stored_fields.lock().await.finish().await;
    }
}

/// Ties C1 (directory), C4 (stored fields, as its own KV-keyed codec alongside tantivy's
/// postings), C5 (agility, for merge/repartition drivers), C6 (locks) and C7 (partitioning)
/// together behind one `tantivy::IndexWriter` per `(group, partition)`.
pub struct IndexMaintainer {
    database: Arc<dyn Database>,
    cache: Arc<BlockCache>,
    runtime: tokio::runtime::Handle,
    index_prefix: Vec<u8>,
    config: Config,
    schema: Schema,
    primary_key_field: Field,
    metrics: Option<Arc<Metrics>>,
    handles: RwLock<FxHashMap<(Vec<u8>, PartitionId), Arc<LazyHandle<PartitionHandle>>>>,
}

impl IndexMaintainer {
    #[must_use]
    pub fn new(
        database: Arc<dyn Database>,
        cache: Arc<BlockCache>,
        runtime: tokio::runtime::Handle,
        index_prefix: Vec<u8>,
        config: Config,
        schema: Schema,
        primary_key_field: Field,
    ) -> Self {
        Self {
            database,
            cache,
            runtime,
            index_prefix,
            config,
            schema,
            primary_key_field,
            metrics: None,
            handles: RwLock::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn group_prefix(&self, group: &[u8]) -> Vec<u8> {
        let mut prefix = self.index_prefix.clone();
        prefix.extend_from_slice(group);
        prefix
    }

    async fn lazy_for(&self, group: &[u8], partition: PartitionId) -> Arc<LazyHandle<PartitionHandle>> {
        let key = (group.to_vec(), partition);
        {
            let read = self.handles.read().await;
            if let Some(existing) = read.get(&key) {
                return existing.clone();
            }
        }
        let mut write = self.handles.write().await;
        write.entry(key).or_insert_with(|| Arc::new(LazyHandle::new())).clone()
    }

    async fn handle_for(&self, group: &[u8], partition: PartitionId) -> crate::Result<Arc<PartitionHandle>> {
        let lazy = self.lazy_for(group, partition).await;

        let group_prefix = self.group_prefix(group);
        let database = self.database.clone();
        let cache = self.cache.clone();
        let runtime = self.runtime.clone();
        let schema = self.schema.clone();
        let block_size = self.config.block_size;
        let compression = compression_for(&self.config);
        let metrics = self.metrics.clone();

        lazy.get(move || async move {
            let dir_prefix = partition_directory_prefix(&group_prefix, partition);
            let directory = crate::directory::KvDirectory::new(
                database.clone(),
                cache,
                runtime,
                dir_prefix,
                block_size,
                compression,
            );
            let index = Index::open_or_create(directory, schema)?;
            let writer: IndexWriter = index.writer(50_000_000)?;

            let stored_prefix = stored_fields_prefix(&group_prefix, partition);
            let mut stored_fields = StoredFieldsWriter::resume(
                database,
                stored_prefix,
                STORED_FIELDS_SEGMENT.to_owned(),
                crate::stored_fields::DEFAULT_OUTSTANDING_WRITES,
            )
            .await?;
            if let Some(metrics) = metrics {
                stored_fields = stored_fields.with_metrics(metrics);
            }

            Ok(PartitionHandle {
                index,
                writer: std::sync::Mutex::new(writer),
                stored_fields: tokio::sync::Mutex::new(stored_fields),
            })
        })
        .await
    }

    fn agility_context(&self) -> AgilityContext {
        let ctx = AgilityContext::agile(
            self.database.clone(),
            self.config.lucene_agile_commit_time_quota,
            self.config.lucene_agile_commit_size_quota,
        );
        match &self.metrics {
            Some(metrics) => ctx.with_metrics(metrics.clone()),
            None => ctx,
        }
    }

    async fn lookup_doc_id(
        &self,
        group_prefix: &[u8],
        partition: PartitionId,
        primary_key: &[u8],
    ) -> crate::Result<Option<u64>> {
        let tx = self.database.create_transaction().await?;
        match tx.get(&pk_doc_id_key(group_prefix, partition, primary_key)).await? {
            Some(bytes) if bytes.len() == 8 => {
                let mut array = [0u8; 8];
                array.copy_from_slice(&bytes);
                Ok(Some(u64::from_be_bytes(array)))
            }
            _ => Ok(None),
        }
    }

    async fn put_doc_id(
        &self,
        group_prefix: &[u8],
        partition: PartitionId,
        primary_key: &[u8],
        doc_id: u64,
    ) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        tx.set(pk_doc_id_key(group_prefix, partition, primary_key), doc_id.to_be_bytes().to_vec());
        tx.commit().await
    }

    async fn clear_doc_id(&self, group_prefix: &[u8], partition: PartitionId, primary_key: &[u8]) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        tx.clear(&pk_doc_id_key(group_prefix, partition, primary_key));
        tx.commit().await
    }

    /// Writes or overwrites `primary_key`'s C4 record for `partition`, reusing its previously
    /// assigned doc id on an update instead of appending a new one (§4.4 "Write path").
    async fn write_stored_fields(
        &self,
        group_prefix: &[u8],
        partition: PartitionId,
        handle: &Arc<PartitionHandle>,
        primary_key: &[u8],
        record: &Record,
    ) -> crate::Result<()> {
        let existing = self.lookup_doc_id(group_prefix, partition, primary_key).await?;
        let mut writer = handle.stored_fields.lock().await;
        match existing {
            Some(doc_id) => writer.overwrite(doc_id, record).await,
            None => {
                let doc_id = writer.write(record).await?;
                drop(writer);
                self.put_doc_id(group_prefix, partition, primary_key, doc_id).await
            }
        }
    }

    /// Reads back the C4 record stored alongside `primary_key`'s document in `partition`, the
    /// read half of the stored-fields codec (§4.4 "Read path"). Returns `None` both when the
    /// document doesn't exist and when the codec is disabled.
    pub async fn get_stored_fields(
        &self,
        group: &[u8],
        partition: PartitionId,
        primary_key: &[u8],
    ) -> crate::Result<Option<Record>> {
        if !self.config.optimized_stored_fields_format_enabled {
            return Ok(None);
        }

        let group_prefix = self.group_prefix(group);
        let Some(doc_id) = self.lookup_doc_id(&group_prefix, partition, primary_key).await? else {
            return Ok(None);
        };
        crate::stored_fields::get(
            &self.database,
            &stored_fields_prefix(&group_prefix, partition),
            STORED_FIELDS_SEGMENT,
            doc_id,
        )
        .await
    }

    /// Acquires the directory lock (C6) for `(group, partition)`, surfacing
    /// [`crate::Error::LockHeld`] straight to the caller rather than swallowing it — ordinary
    /// writes must fail fast when another actor holds the partition, per §5 and scenario S5.
    async fn acquire_directory_lock(&self, group_prefix: &[u8], partition: PartitionId) -> crate::Result<FileLock> {
        FileLock::acquire(
            self.database.clone(),
            directory_lock_key(group_prefix, partition),
            self.config.lucene_file_lock_time_window,
        )
        .await
    }

    /// Step 1-4 of the per-op flow (§4.8): assigns `primary_key`'s document to a partition via
    /// C7, writes its postings through that partition's `IndexWriter`, and writes `stored_fields`
    /// through C4 (gated on [`Config::optimized_stored_fields_format_enabled`]). `primary_key` is
    /// embedded into `doc` here rather than trusted from the caller, so a reader retrieving the
    /// indexed document back always finds it.
    pub async fn index_document(
        &self,
        group: &[u8],
        primary_key: Vec<u8>,
        ts: i64,
        mut doc: TantivyDocument,
        stored_fields: Record,
    ) -> crate::Result<()> {
        let group_prefix = self.group_prefix(group);
        let table = PartitionTable::new(self.database.clone());
        let meta = table
            .pick_for_insert(&group_prefix, self.config.partition_high_watermark, ts)
            .await?;

        let lock = self.acquire_directory_lock(&group_prefix, meta.id).await?;

        let handle = self.handle_for(group, meta.id).await?;

        if self.config.optimized_stored_fields_format_enabled {
            self.write_stored_fields(&group_prefix, meta.id, &handle, &primary_key, &stored_fields)
                .await?;
        }

        doc.add_bytes(self.primary_key_field, primary_key.clone());
        let term = Term::from_field_bytes(self.primary_key_field, &primary_key);
        let writer_handle = handle.clone();

        spawn_blocking_result(&self.runtime, move || {
            let mut writer = writer_handle.writer.lock().expect("index writer mutex poisoned");
            writer.delete_term(term);
            writer.add_document(doc)?;
            Ok(())
        })
        .await?;

        lock.release().await?;

        self.record_timestamp(&group_prefix, meta.id, ts, &primary_key).await?;

        Ok(())
    }

    /// Deletes the document identified by `primary_key` from the partition that covers `ts`,
    /// clearing its C4 record and pk→doc-id mapping alongside its postings.
    pub async fn delete_document(&self, group: &[u8], primary_key: Vec<u8>, ts: i64) -> crate::Result<()> {
        let group_prefix = self.group_prefix(group);
        let table = PartitionTable::new(self.database.clone());
        let meta = table.pick_for_delete(&group_prefix, ts).await?;

        let lock = self.acquire_directory_lock(&group_prefix, meta.id).await?;

        let handle = self.handle_for(group, meta.id).await?;
        let term = Term::from_field_bytes(self.primary_key_field, &primary_key);

        let writer_handle = handle.clone();
        spawn_blocking_result(&self.runtime, move || {
            let mut writer = writer_handle.writer.lock().expect("index writer mutex poisoned");
            writer.delete_term(term);
            Ok(())
        })
        .await?;

        if self.config.optimized_stored_fields_format_enabled {
            if let Some(doc_id) = self.lookup_doc_id(&group_prefix, meta.id, &primary_key).await? {
                crate::stored_fields::delete(
                    &self.database,
                    &stored_fields_prefix(&group_prefix, meta.id),
                    STORED_FIELDS_SEGMENT,
                    doc_id,
                )
                .await?;
                self.clear_doc_id(&group_prefix, meta.id, &primary_key).await?;

                if let Some(metrics) = &self.metrics {
                    metrics.record_delete_stored_fields(1);
                }
            }
        }

        lock.release().await?;

        self.clear_timestamp(&group_prefix, meta.id, ts, &primary_key).await?;

        Ok(())
    }

    /// Commits one partition's `IndexWriter`. The commit hook named in §4.8 step 5.
    pub async fn commit_partition(&self, group: &[u8], partition: PartitionId) -> crate::Result<()> {
        let group_prefix = self.group_prefix(group);
        let lock = self.acquire_directory_lock(&group_prefix, partition).await?;

        let handle = self.handle_for(group, partition).await?;
        spawn_blocking_result(&self.runtime, move || {
            let mut writer = handle.writer.lock().expect("index writer mutex poisoned");
            writer.commit()?;
            Ok(())
        })
        .await?;

        lock.release().await
    }

    /// Runs the auto-merge commit hook (§4.8 step 5) for one partition under C6's directory lock,
    /// so two writers never touch the same partition concurrently. A no-op if another actor
    /// already holds the lock — merging is opportunistic, not required for correctness. Records a
    /// merge marker through C5 so a concurrent bulk writer's sub-transactions flush alongside it
    /// rather than racing the commit.
    pub async fn maybe_merge(&self, group: &[u8], partition: PartitionId, auto_merge_enabled: bool) -> crate::Result<()> {
        if !auto_merge_enabled {
            return Ok(());
        }

        let group_prefix = self.group_prefix(group);
        let lock = match self.acquire_directory_lock(&group_prefix, partition).await {
            Ok(lock) => lock,
            Err(crate::Error::LockHeld) => return Ok(()),
            Err(err) => return Err(err),
        };

        // tantivy runs segment merges on its own background threads once `commit` observes enough
        // segments, governed by the writer's default merge policy.
        let handle = self.handle_for(group, partition).await?;
        let result = spawn_blocking_result(&self.runtime, move || {
            let mut writer = handle.writer.lock().expect("index writer mutex poisoned");
            writer.commit()?;
            Ok(())
        })
        .await;

        if result.is_ok() {
            let ctx = self.agility_context();
            let marker = (crate::time::unix_timestamp_millis() as i64).to_be_bytes().to_vec();
            ctx.set(merge_marker_key(&group_prefix, partition), marker).await?;
            ctx.flush_and_close().await?;
        }

        lock.release().await?;
        result
    }

    /// Runs the auto-repartition commit hook (§4.8 step 5) for every overflowing partition in
    /// `group`, bounded by [`Config::lucene_max_documents_to_move_during_repartitioning`] — a
    /// single call may take several rebalance passes to drain an overflowing partition, and this
    /// hard cap keeps one call from moving an unbounded number of documents. Requires `Arc<Self>`
    /// because the physical document relocation needs to reach back into this maintainer's own
    /// partition handles from within the [`DocTimestamps`] driver.
    pub async fn maybe_repartition(
        self: &Arc<Self>,
        group: &[u8],
        auto_repartition_enabled: bool,
    ) -> crate::Result<RebalanceStats> {
        if !auto_repartition_enabled {
            return Ok(RebalanceStats::default());
        }

        let group_prefix = self.group_prefix(group);
        let table = PartitionTable::new(self.database.clone());
        let driver = RepartitionDriver {
            maintainer: self.clone(),
            group: group.to_vec(),
            group_prefix: group_prefix.clone(),
            ctx: self.agility_context(),
        };

        let cap = self.config.lucene_max_documents_to_move_during_repartitioning;
        let mut total = RebalanceStats::default();

        loop {
            if total.documents_moved >= cap {
                break;
            }

            let stats = rebalance_group(
                &table,
                &group_prefix,
                &driver,
                self.config.partition_high_watermark,
                self.config.lucene_repartition_document_count,
            )
            .await?;

            total.partitions_rebalanced += stats.partitions_rebalanced;
            total.documents_moved += stats.documents_moved;

            if stats.documents_moved == 0 {
                break;
            }
        }

        driver.ctx.flush_and_close().await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_rebalance(0, total.documents_moved);
        }

        Ok(total)
    }

    /// Returns a fresh reader over one partition's tantivy index, reflecting every commit so far
    /// — the query half of the external interface (§6), which this crate otherwise only writes
    /// through.
    pub async fn reader_for(&self, group: &[u8], partition: PartitionId) -> crate::Result<tantivy::IndexReader> {
        let handle = self.handle_for(group, partition).await?;
        Ok(handle.index.reader()?)
    }

    /// Lists every partition currently open for `group`, oldest first — the set a caller must
    /// query across to see every document in the group.
    pub async fn partitions(&self, group: &[u8]) -> crate::Result<Vec<crate::partition::PartitionMeta>> {
        PartitionTable::new(self.database.clone()).list(&self.group_prefix(group)).await
    }

    /// Group-delete (§4.8): clears the entire `IDX · G` subspace — partition metas, every
    /// partition's directory data, and the timestamp index — in one transaction, and closes any
    /// cached writers for the group first so they don't resurrect cleared keys on their next
    /// commit.
    pub async fn delete_group(&self, group: &[u8]) -> crate::Result<()> {
        let group_prefix = self.group_prefix(group);

        let partitions = PartitionTable::new(self.database.clone()).list(&group_prefix).await?;
        for meta in &partitions {
            let lazy = self.lazy_for(group, meta.id).await;
            lazy.close().await;
        }

        {
            let mut write = self.handles.write().await;
            write.retain(|(g, _), _| g.as_slice() != group);
        }

        let tx = self.database.create_transaction().await?;
        let begin = group_prefix.clone();
        let mut end = group_prefix;
        end.push(0xFF);
        tx.clear_range(begin..end);
        tx.commit().await
    }

    async fn record_timestamp(
        &self,
        group_prefix: &[u8],
        partition: PartitionId,
        ts: i64,
        primary_key: &[u8],
    ) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        tx.set(
            timestamp_index_key(group_prefix, partition, ts, primary_key),
            primary_key.to_vec(),
        );
        tx.commit().await
    }

    async fn clear_timestamp(
        &self,
        group_prefix: &[u8],
        partition: PartitionId,
        ts: i64,
        primary_key: &[u8],
    ) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        tx.clear(&timestamp_index_key(group_prefix, partition, ts, primary_key));
        tx.commit().await
    }
}

/// Implements [`DocTimestamps`] against the maintainer's own timestamp index and partition
/// handles, the seam `partition::rebalance` is generic over (§4.7 doc comment). Every KV op this
/// driver performs goes through one [`AgilityContext`] (C5) shared across a whole repartition run,
/// so a long rebalance batches its bookkeeping writes into a handful of commits instead of one
/// per document moved.
struct RepartitionDriver {
    maintainer: Arc<IndexMaintainer>,
    group: Vec<u8>,
    group_prefix: Vec<u8>,
    ctx: AgilityContext,
}

impl RepartitionDriver {
    /// Relocates `primary_key`'s C4 record from `from_partition` to `to_partition`, assigning it a
    /// fresh doc id in the destination (doc ids are only unique within one partition's segment)
    /// and repointing the pk→doc-id mapping at the new location.
    async fn move_stored_fields(
        &self,
        from_partition: PartitionId,
        to_partition: PartitionId,
        primary_key: &[u8],
    ) -> crate::Result<()> {
        let Some(doc_id) = self
            .maintainer
            .lookup_doc_id(&self.group_prefix, from_partition, primary_key)
            .await?
        else {
            return Ok(());
        };

        let from_prefix = stored_fields_prefix(&self.group_prefix, from_partition);
        let Some(record) =
            crate::stored_fields::get(&self.maintainer.database, &from_prefix, STORED_FIELDS_SEGMENT, doc_id).await?
        else {
            return Ok(());
        };

        let destination = self.maintainer.handle_for(&self.group, to_partition).await?;
        let new_doc_id = destination.stored_fields.lock().await.write(&record).await?;

        self.maintainer
            .put_doc_id(&self.group_prefix, to_partition, primary_key, new_doc_id)
            .await?;
        crate::stored_fields::delete(&self.maintainer.database, &from_prefix, STORED_FIELDS_SEGMENT, doc_id).await?;
        self.maintainer
            .clear_doc_id(&self.group_prefix, from_partition, primary_key)
            .await
    }
}

#[async_trait::async_trait]
impl DocTimestamps for RepartitionDriver {
    async fn oldest_timestamps(&self, partition_id: PartitionId, limit: u64) -> crate::Result<Vec<i64>> {
        let prefix = timestamp_index_prefix(&self.group_prefix, partition_id);
        let mut end = prefix.clone();
        end.push(0xFF);

        let pairs = self.ctx.get_range(prefix.clone()..end).await?;
        let mut out = Vec::new();
        for (key, _) in pairs {
            if out.len() as u64 >= limit {
                break;
            }
            let suffix = &key[prefix.len()..];
            if suffix.len() < 9 {
                continue;
            }
            if let Ok(tuple) = Tuple::unpack(&suffix[..9]) {
                if let Some(ts) = tuple.first_int() {
                    out.push(ts);
                }
            }
        }
        Ok(out)
    }

    async fn move_document(&self, ts: i64, from_partition: PartitionId, to_partition: PartitionId) -> crate::Result<()> {
        let prefix = timestamp_index_prefix(&self.group_prefix, from_partition);
        let mut key_begin = prefix;
        key_begin.extend_from_slice(&Tuple::new().push(ts).pack());
        let mut key_end = key_begin.clone();
        key_end.push(0xFF);

        let pairs = self.ctx.get_range(key_begin..key_end).await?;
        let Some((old_key, primary_key)) = pairs.into_iter().next() else {
            return Err(crate::Error::FileNotFound("timestamp index entry for rebalance".to_owned()));
        };

        self.ctx.clear(old_key).await?;
        self.ctx
            .set(
                timestamp_index_key(&self.group_prefix, to_partition, ts, &primary_key),
                primary_key.clone(),
            )
            .await?;

        if from_partition == to_partition {
            return Ok(());
        }

        if self.maintainer.config.optimized_stored_fields_format_enabled {
            self.move_stored_fields(from_partition, to_partition, &primary_key).await?;
        }

        let source = self.maintainer.handle_for(&self.group, from_partition).await?;
        let destination = self.maintainer.handle_for(&self.group, to_partition).await?;
        let term = Term::from_field_bytes(self.maintainer.primary_key_field, &primary_key);

        spawn_blocking_result(&self.maintainer.runtime, move || {
            let reader = source.index.reader()?;
            let searcher = reader.searcher();
            let query = TermQuery::new(term.clone(), IndexRecordOption::Basic);
            let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
            let Some((_, doc_address)) = hits.into_iter().next() else {
                return Ok(());
            };
            let retrieved: TantivyDocument = searcher.doc(doc_address)?;

            let mut source_writer = source.writer.lock().expect("index writer mutex poisoned");
            source_writer.delete_term(term);
            drop(source_writer);

            let mut destination_writer = destination.writer.lock().expect("index writer mutex poisoned");
            destination_writer.add_document(retrieved)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryDatabase;
    use crate::stored_fields::FieldValue;
    use tantivy::doc;
    use tantivy::schema::{BytesOptions, STORED, TEXT};

    fn schema_and_pk() -> (Schema, Field) {
        let mut builder = Schema::builder();
        let pk = builder.add_bytes_field("pk", BytesOptions::default().set_indexed());
        builder.add_text_field("body", TEXT | STORED);
        (builder.build(), pk)
    }

    fn record_for(body: &str) -> Record {
        let mut record = Record::new();
        record.push(1, FieldValue::String(body.to_owned()));
        record
    }

    fn test_maintainer() -> (Arc<IndexMaintainer>, tokio::runtime::Runtime) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let cache = Arc::new(BlockCache::with_capacity_bytes(1_000_000));
        let (schema, pk) = schema_and_pk();
        let config = Config::new().partition_by_field_name("ts");
        let maintainer = Arc::new(IndexMaintainer::new(
            database,
            cache,
            rt.handle().clone(),
            b"idx/".to_vec(),
            config,
            schema,
            pk,
        ));
        (maintainer, rt)
    }

    #[test]
    fn index_document_creates_partition_and_commits() {
        let (maintainer, rt) = test_maintainer();
        rt.block_on(async {
            let body = maintainer.schema.get_field("body").unwrap();
            maintainer
                .index_document(
                    b"group-a",
                    b"pk-1".to_vec(),
                    100,
                    doc!(body => "hello world"),
                    record_for("hello world"),
                )
                .await
                .unwrap();
            maintainer.commit_partition(b"group-a", 0).await.unwrap();

            let table = PartitionTable::new(maintainer.database.clone());
            let metas = table.list(&maintainer.group_prefix(b"group-a")).await.unwrap();
            assert_eq!(metas.len(), 1);
            assert_eq!(metas[0].count, 1);

            let stored = maintainer
                .get_stored_fields(b"group-a", 0, b"pk-1")
                .await
                .unwrap()
                .expect("C4 record written alongside the indexed document");
            assert_eq!(stored.fields()[0].value, FieldValue::String("hello world".to_owned()));
        });
    }

    #[test]
    fn delete_document_decrements_partition_count() {
        let (maintainer, rt) = test_maintainer();
        rt.block_on(async {
            let body = maintainer.schema.get_field("body").unwrap();
            maintainer
                .index_document(b"group-a", b"pk-1".to_vec(), 100, doc!(body => "a"), record_for("a"))
                .await
                .unwrap();
            maintainer
                .index_document(b"group-a", b"pk-2".to_vec(), 110, doc!(body => "b"), record_for("b"))
                .await
                .unwrap();
            maintainer.commit_partition(b"group-a", 0).await.unwrap();

            maintainer.delete_document(b"group-a", b"pk-1".to_vec(), 100).await.unwrap();

            let table = PartitionTable::new(maintainer.database.clone());
            let metas = table.list(&maintainer.group_prefix(b"group-a")).await.unwrap();
            assert_eq!(metas[0].count, 1);

            assert!(maintainer.get_stored_fields(b"group-a", 0, b"pk-1").await.unwrap().is_none());
            assert!(maintainer.get_stored_fields(b"group-a", 0, b"pk-2").await.unwrap().is_some());
        });
    }

    #[test]
    fn delete_group_clears_partition_metas() {
        let (maintainer, rt) = test_maintainer();
        rt.block_on(async {
            let body = maintainer.schema.get_field("body").unwrap();
            maintainer
                .index_document(b"group-b", b"pk-1".to_vec(), 1, doc!(body => "a"), record_for("a"))
                .await
                .unwrap();
            maintainer.commit_partition(b"group-b", 0).await.unwrap();

            maintainer.delete_group(b"group-b").await.unwrap();

            let table = PartitionTable::new(maintainer.database.clone());
            let metas = table.list(&maintainer.group_prefix(b"group-b")).await.unwrap();
            assert!(metas.is_empty());
        });
    }

    #[test]
    fn maybe_merge_records_a_merge_marker() {
        let (maintainer, rt) = test_maintainer();
        rt.block_on(async {
            let body = maintainer.schema.get_field("body").unwrap();
            maintainer
                .index_document(b"group-a", b"pk-1".to_vec(), 100, doc!(body => "a"), record_for("a"))
                .await
                .unwrap();
            maintainer.commit_partition(b"group-a", 0).await.unwrap();

            let group_prefix = maintainer.group_prefix(b"group-a");
            let tx = maintainer.database.create_transaction().await.unwrap();
            assert!(tx.get(&merge_marker_key(&group_prefix, 0)).await.unwrap().is_none());

            maintainer.maybe_merge(b"group-a", 0, true).await.unwrap();

            let tx = maintainer.database.create_transaction().await.unwrap();
            assert!(tx.get(&merge_marker_key(&group_prefix, 0)).await.unwrap().is_some());
        });
    }

    #[test]
    fn maybe_repartition_is_a_no_op_when_disabled() {
        let (maintainer, rt) = test_maintainer();
        rt.block_on(async {
            let stats = maintainer.maybe_repartition(b"group-a", false).await.unwrap();
            assert_eq!(stats.documents_moved, 0);
        });
    }

    /// Scenario S5 (§8): another actor holding the directory lock for `(group, partition)` makes
    /// an ordinary write fail fast with [`crate::Error::LockHeld`], while a plain query (which
    /// never touches the lock) keeps working.
    #[test]
    fn scenario_s5_lock_blocks_concurrent_write() {
        let (maintainer, rt) = test_maintainer();
        rt.block_on(async {
            let body = maintainer.schema.get_field("body").unwrap();
            maintainer
                .index_document(b"group-a", b"pk-1".to_vec(), 100, doc!(body => "first"), record_for("first"))
                .await
                .unwrap();
            maintainer.commit_partition(b"group-a", 0).await.unwrap();

            let group_prefix = maintainer.group_prefix(b"group-a");
            let foreign_lock = FileLock::acquire(
                maintainer.database.clone(),
                directory_lock_key(&group_prefix, 0),
                maintainer.config.lucene_file_lock_time_window,
            )
            .await
            .unwrap();

            let result = maintainer
                .index_document(b"group-a", b"pk-2".to_vec(), 101, doc!(body => "second"), record_for("second"))
                .await;
            assert!(matches!(result, Err(crate::Error::LockHeld)));

            let reader = maintainer.reader_for(b"group-a", 0).await.unwrap();
            let searcher = reader.searcher();
            assert_eq!(searcher.num_docs(), 1);

            foreign_lock.release().await.unwrap();
            maintainer
                .index_document(b"group-a", b"pk-2".to_vec(), 101, doc!(body => "second"), record_for("second"))
                .await
                .unwrap();
        });
    }
}
