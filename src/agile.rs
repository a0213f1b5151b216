// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The agility context (C5): a commit driver wrapping a caller's transaction but creating floating
//! sub-transactions for bulk work (merge, repartition), auto-committing when a time or size quota
//! trips so long-running operations don't outgrow one transaction.

use crate::kv::{Database, KvPair, Transaction};
use crate::metrics::Metrics;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct SubTransaction {
    tx: Box<dyn Transaction>,
    opened_at: Instant,
}

enum Mode {
    /// Every op passes straight through to the caller's own transaction.
    NonAgile(Box<dyn Transaction>),
    /// Ops land in a lazily-created sub-transaction, auto-committed on quota trip.
    Agile {
        database: Arc<dyn Database>,
        time_quota: Duration,
        size_quota: u64,
        current: RwLock<Option<SubTransaction>>,
        committing: AtomicBool,
        metrics: Option<Arc<Metrics>>,
    },
}

/// Drives sub-transaction lifecycle for bulk operations (§4.5).
pub struct AgilityContext {
    mode: Mode,
}

impl AgilityContext {
    /// Ops pass straight through `tx`; no sub-transactions are ever created.
    #[must_use]
    pub fn non_agile(tx: Box<dyn Transaction>) -> Self {
        Self {
            mode: Mode::NonAgile(tx),
        }
    }

    #[must_use]
    pub fn agile(database: Arc<dyn Database>, time_quota: Duration, size_quota: u64) -> Self {
        Self {
            mode: Mode::Agile {
                database,
                time_quota,
                size_quota,
                current: RwLock::new(None),
                committing: AtomicBool::new(false),
                metrics: None,
            },
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        if let Mode::Agile { metrics: slot, .. } = &mut self.mode {
            *slot = Some(metrics);
        }
        self
    }

    /// Runs `op` against the current transaction (creating a sub-transaction lazily in agile
    /// mode), then checks whether a quota has tripped and commits if so.
    pub async fn apply<F, T>(&self, op: F) -> crate::Result<T>
    where
        F: FnOnce(&dyn Transaction) -> T,
    {
        match &self.mode {
            Mode::NonAgile(tx) => Ok(op(tx.as_ref())),
            Mode::Agile {
                database,
                time_quota,
                size_quota,
                current,
                metrics,
                ..
            } => {
                // Ensure a sub-transaction exists before taking the read side for the op itself.
                if current.read().await.is_none() {
                    let tx = database.create_transaction().await?;
                    let mut write_guard = current.write().await;
                    if write_guard.is_none() {
                        *write_guard = Some(SubTransaction {
                            tx,
                            opened_at: Instant::now(),
                        });
                    }
                }

                let guard = current.read().await;
                let sub = guard.as_ref().expect("sub-transaction ensured above");
                let result = op(sub.tx.as_ref());
                let bytes_written = sub.tx.bytes_written();
                let elapsed = sub.opened_at.elapsed();
                drop(guard);

                if elapsed >= *time_quota {
                    self.try_commit_current(true, false, metrics).await?;
                } else if bytes_written >= *size_quota {
                    self.try_commit_current(false, true, metrics).await?;
                }

                Ok(result)
            }
        }
    }

    async fn try_commit_current(
        &self,
        time_quota_tripped: bool,
        size_quota_tripped: bool,
        metrics: &Option<Arc<Metrics>>,
    ) -> crate::Result<()> {
        let Mode::Agile { committing, .. } = &self.mode else {
            return Ok(());
        };

        if committing
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_err()
        {
            // Another task is already committing this round; don't double-commit.
            return Ok(());
        }

        let result = self.commit_current_locked().await;
        committing.store(false, SeqCst);

        if result.is_ok() {
            if let Some(metrics) = metrics {
                if time_quota_tripped {
                    metrics.record_agile_time_quota_commit();
                }
                if size_quota_tripped {
                    metrics.record_agile_size_quota_commit();
                }
            }
        }

        result
    }

    async fn commit_current_locked(&self) -> crate::Result<()> {
        let Mode::Agile { current, .. } = &self.mode else {
            return Ok(());
        };

        let mut guard = current.write().await;
        if let Some(sub) = guard.take() {
            sub.tx.commit().await?;
        }
        Ok(())
    }

    /// Commits the current sub-transaction (non-agile mode: a no-op, since the caller owns commit
    /// of its own transaction).
    pub async fn flush(&self) -> crate::Result<()> {
        if matches!(self.mode, Mode::Agile { .. }) {
            self.commit_current_locked().await?;
        }
        Ok(())
    }

    /// Commits the current sub-transaction and leaves the context unusable for further ops.
    pub async fn flush_and_close(&self) -> crate::Result<()> {
        self.flush().await
    }

    /// Discards any open sub-transaction without committing, tolerating the case where there was
    /// none to discard. Used to recover after a failed op so the caller can retry with a fresh
    /// sub-transaction.
    pub async fn abort_and_reset(&self) {
        if let Mode::Agile { current, .. } = &self.mode {
            let mut guard = current.write().await;
            *guard = None;
        }
    }

    pub async fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
        match &self.mode {
            Mode::NonAgile(tx) => tx.get(key).await,
            Mode::Agile { database, current, .. } => {
                let guard = current.read().await;
                if let Some(sub) = guard.as_ref() {
                    sub.tx.get(key).await
                } else {
                    drop(guard);
                    let tx = database.create_transaction().await?;
                    tx.get(key).await
                }
            }
        }
    }

    pub async fn get_range(&self, range: Range<Vec<u8>>) -> crate::Result<Vec<KvPair>> {
        match &self.mode {
            Mode::NonAgile(tx) => tx.get_range(range).await,
            Mode::Agile { database, current, .. } => {
                let guard = current.read().await;
                if let Some(sub) = guard.as_ref() {
                    sub.tx.get_range(range).await
                } else {
                    drop(guard);
                    let tx = database.create_transaction().await?;
                    tx.get_range(range).await
                }
            }
        }
    }

    pub async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> crate::Result<()> {
        self.apply(move |tx| tx.set(key, value)).await
    }

    pub async fn clear(&self, key: Vec<u8>) -> crate::Result<()> {
        self.apply(move |tx| tx.clear(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryDatabase;

    #[tokio::test]
    async fn non_agile_writes_go_straight_to_caller_tx() {
        let database = MemoryDatabase::new();
        let tx = database.create_transaction().await.unwrap();
        let ctx = AgilityContext::non_agile(tx);

        ctx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        assert_eq!(ctx.get(b"a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn agile_commits_when_size_quota_tripped() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let ctx = AgilityContext::agile(database.clone(), Duration::from_secs(3600), 4);

        ctx.set(b"a".to_vec(), b"1234567890".to_vec()).await.unwrap();

        // The size quota tripped mid-apply and committed; a fresh read transaction should see it.
        let verify_tx = database.create_transaction().await.unwrap();
        assert_eq!(verify_tx.get(b"a").await.unwrap(), Some(b"1234567890".to_vec()));
    }

    #[tokio::test]
    async fn abort_and_reset_discards_uncommitted_subtx() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let ctx = AgilityContext::agile(database.clone(), Duration::from_secs(3600), u64::MAX);

        ctx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        ctx.abort_and_reset().await;

        let verify_tx = database.create_transaction().await.unwrap();
        assert_eq!(verify_tx.get(b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn flush_commits_pending_writes() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let ctx = AgilityContext::agile(database.clone(), Duration::from_secs(3600), u64::MAX);

        ctx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
        ctx.flush().await.unwrap();

        let verify_tx = database.create_transaction().await.unwrap();
        assert_eq!(verify_tx.get(b"a").await.unwrap(), Some(b"1".to_vec()));
    }
}
