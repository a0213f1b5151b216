// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Partition rebalancing (§4.7 "Rebalancing"): moves the oldest documents out of an overflowing
//! partition into a destination partition once a boundary timestamp can be established.
//!
//! Finding and physically relocating documents requires reading stored-field records, which is
//! the maintainer's (C8) concern, not the partitioner's — so this module is generic over a small
//! [`DocTimestamps`] trait the maintainer implements, the same seam the teacher uses when its
//! compaction module is generic over a `Strategy` trait rather than hard-coding one policy.

use super::meta::PartitionMeta;
use super::PartitionTable;
use async_trait::async_trait;

/// What the rebalancer needs from whatever actually stores documents.
#[async_trait]
pub trait DocTimestamps: Send + Sync {
    /// Returns up to `limit` of the oldest document timestamps resident in `partition_id`,
    /// ascending. May return fewer than `limit` if the partition holds fewer documents.
    async fn oldest_timestamps(&self, partition_id: super::PartitionId, limit: u64) -> crate::Result<Vec<i64>>;

    /// Physically relocates the document at `ts` from `from_partition` to `to_partition`.
    async fn move_document(
        &self,
        ts: i64,
        from_partition: super::PartitionId,
        to_partition: super::PartitionId,
    ) -> crate::Result<()>;
}

#[derive(Default, Debug, Clone, Copy)]
pub struct RebalanceStats {
    pub partitions_rebalanced: u64,
    pub documents_moved: u64,
}

/// Scans every partition in `group_prefix` oldest-first and rebalances any whose count exceeds
/// `high_watermark`.
pub async fn rebalance_group(
    table: &PartitionTable,
    group_prefix: &[u8],
    docs: &(dyn DocTimestamps),
    high_watermark: u64,
    repartition_count: u64,
) -> crate::Result<RebalanceStats> {
    let mut stats = RebalanceStats::default();
    let mut metas = table.list(group_prefix).await?;
    metas.sort_by_key(|m| m.from);

    for source in metas {
        if (source.count as u64) <= high_watermark {
            continue;
        }

        let n = repartition_count.min(high_watermark);
        let moved = rebalance_one(table, group_prefix, docs, &source, n, high_watermark).await?;
        if moved > 0 {
            stats.partitions_rebalanced += 1;
            stats.documents_moved += moved;
        }
    }

    Ok(stats)
}

async fn rebalance_one(
    table: &PartitionTable,
    group_prefix: &[u8],
    docs: &(dyn DocTimestamps),
    source: &PartitionMeta,
    n: u64,
    high_watermark: u64,
) -> crate::Result<u64> {
    let fetched = docs.oldest_timestamps(source.id, n + 1).await?;
    if (fetched.len() as u64) < n + 1 {
        // Not enough documents to establish a boundary distinct from the rest of the partition.
        return Ok(0);
    }

    let boundary = fetched[n as usize];
    let nth = fetched[(n - 1) as usize];
    if boundary == nth {
        return Err(crate::Error::AmbiguousBoundary);
    }

    let to_move = &fetched[..n as usize];
    let moved_oldest = to_move[0];

    let metas = table.list(group_prefix).await?;
    let destination = pick_destination(&metas, source, moved_oldest, n, high_watermark);

    let destination_id = match &destination {
        Some(meta) => meta.id,
        None => metas.iter().map(|m| m.id).max().unwrap_or(source.id) + 1,
    };

    for &ts in to_move {
        docs.move_document(ts, source.id, destination_id).await?;
    }

    // Update destination meta (create if it didn't exist).
    let dest_after = match destination {
        Some(meta) => PartitionMeta {
            count: meta.count + n as i64,
            from: meta.from.min(moved_oldest),
            to: meta.to.max(*to_move.last().expect("non-empty")),
            ..meta
        },
        None => PartitionMeta {
            id: destination_id,
            count: n as i64,
            from: moved_oldest,
            to: *to_move.last().expect("non-empty"),
        },
    };
    table.put(group_prefix, &dest_after).await?;

    // Update source meta: count -= n, from = boundary.
    let source_after = PartitionMeta {
        count: source.count - n as i64,
        from: boundary,
        to: source.to,
        id: source.id,
    };
    table.rekey(group_prefix, source.from, &source_after).await?;

    Ok(n)
}

fn pick_destination(
    metas: &[PartitionMeta],
    source: &PartitionMeta,
    boundary_prime: i64,
    n: u64,
    high_watermark: u64,
) -> Option<PartitionMeta> {
    let candidate = metas
        .iter()
        .find(|m| m.id != source.id && m.contains(boundary_prime))?;

    let would_overflow = (candidate.count as u64 + n) > high_watermark;
    if would_overflow {
        return None;
    }

    Some(candidate.clone())
}
