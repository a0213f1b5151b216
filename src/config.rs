// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The recognized configuration surface (§6), as a builder mirroring the teacher's own
//! `Config::new(path)`-style chaining.

use std::time::Duration;

/// Default per-partition document cap before a rebalance is triggered.
pub const DEFAULT_HIGH_WATERMARK: u64 = 400_000;

/// Default block size for the virtual file directory (C1), in bytes.
pub const DEFAULT_BLOCK_SIZE: u32 = 16 * 1024;

/// Default agile commit time quota (C5).
pub const DEFAULT_AGILE_COMMIT_TIME_QUOTA: Duration = Duration::from_secs(1);

/// Default agile commit size quota (C5), in bytes.
pub const DEFAULT_AGILE_COMMIT_SIZE_QUOTA: u64 = 900 * 1024;

/// Default directory lock time window (C6).
pub const DEFAULT_LOCK_TIME_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Floor below which [`Config::lock_time_window`] refuses to go.
pub const MIN_LOCK_TIME_WINDOW: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct Config {
    pub optimized_stored_fields_format_enabled: bool,
    pub primary_key_segment_index_v2_enabled: bool,
    pub index_compression_enabled: bool,
    pub partition_by_field_name: String,
    pub partition_high_watermark: u64,
    pub lucene_repartition_document_count: u64,
    pub lucene_max_documents_to_move_during_repartitioning: u64,
    pub lucene_merge_segments_per_tier: f32,
    pub lucene_agile_commit_time_quota: Duration,
    pub lucene_agile_commit_size_quota: u64,
    pub lucene_file_lock_time_window: Duration,
    pub block_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            optimized_stored_fields_format_enabled: true,
            primary_key_segment_index_v2_enabled: false,
            index_compression_enabled: true,
            partition_by_field_name: String::new(),
            partition_high_watermark: DEFAULT_HIGH_WATERMARK,
            lucene_repartition_document_count: DEFAULT_HIGH_WATERMARK / 10,
            lucene_max_documents_to_move_during_repartitioning: DEFAULT_HIGH_WATERMARK,
            lucene_merge_segments_per_tier: 2.0,
            lucene_agile_commit_time_quota: DEFAULT_AGILE_COMMIT_TIME_QUOTA,
            lucene_agile_commit_size_quota: DEFAULT_AGILE_COMMIT_SIZE_QUOTA,
            lucene_file_lock_time_window: DEFAULT_LOCK_TIME_WINDOW,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn partition_by_field_name(mut self, name: impl Into<String>) -> Self {
        self.partition_by_field_name = name.into();
        self
    }

    #[must_use]
    pub fn partition_high_watermark(mut self, watermark: u64) -> Self {
        self.partition_high_watermark = watermark;
        self
    }

    #[must_use]
    pub fn lucene_repartition_document_count(mut self, count: u64) -> Self {
        self.lucene_repartition_document_count = count;
        self
    }

    #[must_use]
    pub fn lucene_merge_segments_per_tier(mut self, tier: f32) -> Self {
        assert!(tier >= 2.0, "merge segments per tier must be >= 2.0");
        self.lucene_merge_segments_per_tier = tier;
        self
    }

    /// Sets the directory-lock time window, floored at [`MIN_LOCK_TIME_WINDOW`].
    #[must_use]
    pub fn lucene_file_lock_time_window(mut self, window: Duration) -> Self {
        self.lucene_file_lock_time_window = window.max(MIN_LOCK_TIME_WINDOW);
        self
    }

    #[must_use]
    pub fn index_compression_enabled(mut self, enabled: bool) -> Self {
        self.index_compression_enabled = enabled;
        self
    }

    #[must_use]
    pub fn optimized_stored_fields_format_enabled(mut self, enabled: bool) -> Self {
        self.optimized_stored_fields_format_enabled = enabled;
        self
    }

    /// Validates that the partitioning field name is non-blank, as required before any insert.
    pub fn validate(&self) -> crate::Result<()> {
        if self.partition_by_field_name.trim().is_empty() {
            return Err(crate::Error::MissingPartitionField);
        }
        Ok(())
    }
}
