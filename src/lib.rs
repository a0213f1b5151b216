// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A transactional, partition-aware persistence core for full-text indexes: a [`tantivy`]
//! [`Directory`](tantivy::Directory) backed by a FoundationDB-shaped key-value store, with the
//! document-count-based partitioning, agile (batched sub-transaction) commits, and directory
//! locking needed to run many independently-growing tantivy indexes inside one transactional
//! keyspace.
//!
//! The crate is organized around the components each piece of the system is responsible for:
//!
//! - [`directory`] — the KV-backed virtual file system tantivy writes segments into.
//! - [`cache`] — the process-wide block cache shared by every open directory.
//! - [`lazy`] — the once-only, deadlock-safe lazy resource initializer used to open expensive
//!   per-partition handles (tantivy `Index`/`IndexWriter`) on first use.
//! - [`agile`] — the agility context governing when buffered writes flush to a committed
//!   sub-transaction.
//! - [`lock`] — the cooperative directory lock that keeps two writers from touching the same
//!   partition concurrently.
//! - [`partition`] — the document-count-based partitioner and its rebalancing algorithm.
//! - [`stored_fields`] — the per-document stored-field codec and reader/writer.
//! - [`maintainer`] — ties the above together into the record-level insert/delete/rebalance flow.

pub mod agile;
pub mod cache;
pub mod coding;
pub mod config;
pub mod directory;
pub mod error;
pub mod kv;
pub mod lazy;
pub mod lock;
pub mod maintainer;
pub mod metrics;
pub mod partition;
pub mod stored_fields;
mod time;
pub mod tuple;

pub use config::Config;
pub use error::{Error, Result};
