// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Observable event counters named in §6 of the design. Kept as plain atomics behind one shared
//! struct rather than pulling in a metrics-registry crate, matching the teacher's own `metrics`
//! feature, which is likewise just atomic counters on the segment/table structs.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

#[derive(Default)]
pub struct Metrics {
    pub wait_get_stored_fields: AtomicU64,
    pub write_stored_fields_bytes: AtomicU64,
    pub delete_stored_fields_count: AtomicU64,
    pub agile_commits_size_quota: AtomicU64,
    pub agile_commits_time_quota: AtomicU64,
    pub wait_file_lock_set: AtomicU64,
    pub wait_file_lock_clear: AtomicU64,
    pub rebalance_partition_micros: AtomicU64,
    pub rebalance_partition_docs: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write_stored_fields(&self, bytes: u64) {
        self.write_stored_fields_bytes.fetch_add(bytes, Relaxed);
    }

    pub fn record_delete_stored_fields(&self, count: u64) {
        self.delete_stored_fields_count.fetch_add(count, Relaxed);
    }

    pub fn record_agile_size_quota_commit(&self) {
        self.agile_commits_size_quota.fetch_add(1, Relaxed);
    }

    pub fn record_agile_time_quota_commit(&self) {
        self.agile_commits_time_quota.fetch_add(1, Relaxed);
    }

    pub fn record_rebalance(&self, micros: u64, docs_moved: u64) {
        self.rebalance_partition_micros.fetch_add(micros, Relaxed);
        self.rebalance_partition_docs.fetch_add(docs_moved, Relaxed);
    }
}
