// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The lazy handle (C3): a deadlock-safe, once-only initializer for expensive IO resources.
//!
//! Built on [`tokio::sync::OnceCell`] rather than a hand-rolled `Mutex<Option<T>>`, because a
//! mutex held across an `.await` is exactly the shape of deadlock this component exists to avoid:
//! if the initializer's future is itself scheduled on the same work-stealing pool as its callers,
//! a blocking mutex can park the one worker that would have driven the initializer to completion.
//! `OnceCell::get_or_try_init` runs the initializing future cooperatively and lets every other
//! caller `.await` the same cell without blocking a worker thread.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// A resource that can be closed exactly once, after having been lazily initialized at most once.
#[async_trait::async_trait]
pub trait Closeable: Send + Sync {
    async fn close(&self);
}

enum State<T> {
    Uninit,
    Failed,
    Init(Arc<T>),
}

/// Once-only lazy initializer, safe under fork-join / work-stealing schedulers (§4.3).
pub struct LazyHandle<T: Closeable> {
    cell: OnceCell<Arc<T>>,
    failed: tokio::sync::Mutex<bool>,
    closed: std::sync::atomic::AtomicBool,
}

impl<T: Closeable> Default for LazyHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Closeable> LazyHandle<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            failed: tokio::sync::Mutex::new(false),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Returns the initialized value, running `init` exactly once across all concurrent callers.
    /// If `init` previously failed, every subsequent call re-raises [`crate::Error::Io`] wrapping
    /// the same message (the underlying error itself is not `Clone`, so we preserve its text).
    pub async fn get<F, Fut>(&self, init: F) -> crate::Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        if *self.failed.lock().await {
            return Err(crate::Error::Io(std::io::Error::other(
                "lazy handle initializer previously failed",
            )));
        }

        let result = self
            .cell
            .get_or_try_init(|| async move { init().await.map(Arc::new) })
            .await;

        match result {
            Ok(value) => Ok(value.clone()),
            Err(err) => {
                *self.failed.lock().await = true;
                Err(err)
            }
        }
    }

    /// Closes the resource if it was ever successfully initialized. A no-op if `get` was never
    /// called, or if `init` only ever failed. Invokes the resource's close exactly once, even
    /// across repeated calls to `close`.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Some(value) = self.cell.get() {
            value.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    struct Resource {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Closeable for Resource {
        async fn close(&self) {
            self.closes.fetch_add(1, SeqCst);
        }
    }

    #[tokio::test]
    async fn concurrent_get_runs_initializer_once() {
        let handle = Arc::new(LazyHandle::<Resource>::new());
        let inits = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let handle = handle.clone();
            let inits = inits.clone();
            let closes = closes.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .get(|| {
                        let inits = inits.clone();
                        let closes = closes.clone();
                        async move {
                            inits.fetch_add(1, SeqCst);
                            tokio::task::yield_now().await;
                            Ok(Resource { closes })
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut values = Vec::new();
        for task in tasks {
            values.push(task.await.unwrap());
        }

        assert_eq!(inits.load(SeqCst), 1);
        for value in &values {
            assert!(Arc::ptr_eq(value, &values[0]));
        }
    }

    #[tokio::test]
    async fn close_without_get_is_a_no_op() {
        let handle = LazyHandle::<Resource>::new();
        handle.close().await;
        // no panic, no initializer ever ran
    }

    #[tokio::test]
    async fn close_invokes_resource_close_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let handle = LazyHandle::<Resource>::new();

        handle
            .get(|| {
                let closes = closes.clone();
                async move { Ok(Resource { closes }) }
            })
            .await
            .unwrap();

        handle.close().await;
        handle.close().await;

        assert_eq!(closes.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_init_is_reraised_on_every_get() {
        let handle = LazyHandle::<Resource>::new();

        let first = handle
            .get(|| async { Err(crate::Error::Timeout) })
            .await;
        assert!(first.is_err());

        let second = handle
            .get(|| async { Ok(Resource { closes: Arc::new(AtomicUsize::new(0)) }) })
            .await;
        assert!(second.is_err(), "initializer must not run again after a failure");
    }
}
