// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The partitioner (C7): routes documents among time-bounded partitions within a grouping key so
//! no single physical sub-index grows past `partition_high_watermark`.

pub mod meta;
pub mod rebalance;
pub mod validator;

pub use meta::{PartitionId, PartitionMeta};
pub use rebalance::{rebalance_group, DocTimestamps, RebalanceStats};

use crate::coding::{Decode, Encode};
use crate::kv::Database;
use std::sync::Arc;

const META_TAG: u8 = 0;

fn meta_key(group_prefix: &[u8], from: i64) -> Vec<u8> {
    let mut key = group_prefix.to_vec();
    key.push(META_TAG);
    key.extend_from_slice(&meta::meta_key_suffix(from));
    key
}

fn meta_subspace_range(group_prefix: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut begin = group_prefix.to_vec();
    begin.push(META_TAG);
    let mut end = group_prefix.to_vec();
    end.push(META_TAG + 1);
    (begin, end)
}

/// Operates on one logical index's partition metadata. Stateless beyond the database handle — the
/// group prefix is supplied per call so one table instance serves every group.
pub struct PartitionTable {
    database: Arc<dyn Database>,
}

impl PartitionTable {
    #[must_use]
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    /// Lists every partition meta in `group_prefix`, ordered oldest (`from`) first.
    pub async fn list(&self, group_prefix: &[u8]) -> crate::Result<Vec<PartitionMeta>> {
        let tx = self.database.create_transaction().await?;
        let (begin, end) = meta_subspace_range(group_prefix);
        let pairs = tx.get_range(begin..end).await?;
        pairs
            .into_iter()
            .map(|(_, value)| Ok(PartitionMeta::decode_from(&mut &value[..])?))
            .collect()
    }

    async fn put(&self, group_prefix: &[u8], meta: &PartitionMeta) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        tx.set(meta_key(group_prefix, meta.from), meta.encode_to_vec()?);
        tx.commit().await
    }

    /// Moves a partition meta from its old key (keyed by the old `from`) to its new key, in one
    /// transaction — required because the key *is* the `from` value.
    async fn rekey(
        &self,
        group_prefix: &[u8],
        old_from: i64,
        meta: &PartitionMeta,
    ) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        if old_from != meta.from {
            tx.clear(&meta_key(group_prefix, old_from));
        }
        tx.set(meta_key(group_prefix, meta.from), meta.encode_to_vec()?);
        tx.commit().await
    }

    /// Assigns `ts` to a partition, creating one if needed, and persists the updated meta.
    /// Returns the partition that now owns the document.
    pub async fn pick_for_insert(
        &self,
        group_prefix: &[u8],
        high_watermark: u64,
        ts: i64,
    ) -> crate::Result<PartitionMeta> {
        let metas = self.list(group_prefix).await?;

        if metas.is_empty() {
            let meta = PartitionMeta {
                id: 0,
                count: 1,
                from: ts,
                to: ts,
            };
            self.put(group_prefix, &meta).await?;
            return Ok(meta);
        }

        let greatest_at_or_before = metas
            .iter()
            .filter(|m| m.from <= ts)
            .max_by_key(|m| m.from)
            .cloned();

        let (candidate, fell_back_to_oldest) = match greatest_at_or_before {
            Some(m) => (m, false),
            None => {
                let oldest = metas.iter().min_by_key(|m| m.from).expect("non-empty").clone();
                (oldest, true)
            }
        };

        if fell_back_to_oldest && candidate.count as u64 >= high_watermark && ts < candidate.from {
            let next_id = metas.iter().map(|m| m.id).max().unwrap_or(0) + 1;
            let meta = PartitionMeta {
                id: next_id,
                count: 1,
                from: ts,
                to: ts,
            };
            self.put(group_prefix, &meta).await?;
            return Ok(meta);
        }

        let old_from = candidate.from;
        let updated = PartitionMeta {
            id: candidate.id,
            count: candidate.count + 1,
            from: candidate.from.min(ts),
            to: candidate.to.max(ts),
        };
        self.rekey(group_prefix, old_from, &updated).await?;
        Ok(updated)
    }

    /// Finds the partition containing `ts` and decrements its count. Fails if no partition's
    /// `[from, to]` covers `ts`, or if the decrement would make the count negative.
    pub async fn pick_for_delete(
        &self,
        group_prefix: &[u8],
        ts: i64,
    ) -> crate::Result<PartitionMeta> {
        let metas = self.list(group_prefix).await?;
        let candidate = metas
            .into_iter()
            .find(|m| m.contains(ts))
            .ok_or_else(|| crate::Error::FileNotFound(format!("partition covering ts {ts}")))?;

        if candidate.count <= 0 {
            return Err(crate::Error::NegativePartitionCount);
        }

        let updated = PartitionMeta {
            count: candidate.count - 1,
            ..candidate
        };
        self.put(group_prefix, &updated).await?;
        Ok(updated)
    }

    /// Clears every partition meta for `group_prefix` (the caller is responsible for separately
    /// clearing the group's partition *data* subspace, tag `1`, via C1/C8).
    pub async fn delete_group(&self, group_prefix: &[u8]) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        let (begin, end) = meta_subspace_range(group_prefix);
        tx.clear_range(begin..end);
        tx.commit().await
    }
}
