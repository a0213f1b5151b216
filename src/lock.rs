// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The directory lock (C6): cross-actor mutual exclusion over a named resource, implemented as a
//! single KV cell holding an owner UUID and an acquisition timestamp, stealable once stale.
//!
//! This is a higher-level cooperative lock sitting above one partition (guarding, e.g., "only one
//! maintainer may run a merge against this partition at a time"), distinct from the low-level
//! `tantivy::Directory::acquire_lock` plumbing in [`crate::directory`], which only protects against
//! two `IndexWriter`s opening the same directory in-process.

use crate::coding::{Decode, Encode};
use crate::kv::Database;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
struct LockCell {
    owner: Uuid,
    acquired_at_ms: i64,
}

impl Encode for LockCell {
    fn encode_into<W: std::io::Write>(&self, writer: &mut W) -> Result<(), crate::coding::EncodeError> {
        writer.write_all(self.owner.as_bytes())?;
        writer.write_i64::<BigEndian>(self.acquired_at_ms)?;
        Ok(())
    }
}

impl Decode for LockCell {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self, crate::coding::DecodeError> {
        let mut owner_bytes = [0u8; 16];
        reader.read_exact(&mut owner_bytes)?;
        let acquired_at_ms = reader.read_i64::<BigEndian>()?;
        Ok(Self {
            owner: Uuid::from_bytes(owner_bytes),
            acquired_at_ms,
        })
    }
}

/// A held directory lock. Dropping this without calling [`FileLock::release`] leaves the cell in
/// place until it goes stale and is stolen by the next acquirer — there is no synchronous `Drop`
/// release, since release is a fallible KV round trip.
pub struct FileLock {
    database: Arc<dyn Database>,
    key: Vec<u8>,
    self_uuid: Uuid,
    window: Duration,
}

impl FileLock {
    /// Attempts to acquire the lock at `key`. Succeeds if the cell is absent, stale (older than
    /// `window`), or suspiciously in the future (clock skew past `window`); fails with
    /// [`crate::Error::LockHeld`] if another owner holds it fresh.
    pub async fn acquire(
        database: Arc<dyn Database>,
        key: Vec<u8>,
        window: Duration,
    ) -> crate::Result<Self> {
        let self_uuid = Uuid::new_v4();
        let now_ms = crate::time::unix_timestamp_millis() as i64;

        let tx = database.create_transaction().await?;
        let existing = match tx.get(&key).await? {
            Some(bytes) => Some(LockCell::decode_from(&mut &bytes[..])?),
            None => None,
        };

        if let Some(cell) = &existing {
            let age_ms = now_ms - cell.acquired_at_ms;
            let window_ms = window.as_millis() as i64;
            // A lock whose acquisition time is slightly ahead of ours (ordinary clock skew) is
            // still fresh; only age_ms beyond -window_ms in either direction makes it stealable.
            let fresh = (-window_ms..=window_ms).contains(&age_ms);
            if fresh {
                return Err(crate::Error::LockHeld);
            }
        }

        let cell = LockCell {
            owner: self_uuid,
            acquired_at_ms: now_ms,
        };
        tx.set(key.clone(), cell.encode_to_vec()?);
        tx.commit().await?;

        Ok(Self {
            database,
            key,
            self_uuid,
            window,
        })
    }

    /// Re-reads the lock cell and fails with [`crate::Error::AlreadyClosed`] if we are no longer
    /// the fresh owner; otherwise refreshes the timestamp. Call periodically and before any
    /// sensitive operation the lock is meant to protect.
    pub async fn ensure_valid(&self) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        let now_ms = crate::time::unix_timestamp_millis() as i64;

        let cell = match tx.get(&self.key).await? {
            Some(bytes) => LockCell::decode_from(&mut &bytes[..])?,
            None => return Err(crate::Error::AlreadyClosed),
        };

        if cell.owner != self.self_uuid {
            return Err(crate::Error::AlreadyClosed);
        }

        let age_ms = now_ms - cell.acquired_at_ms;
        if age_ms > self.window.as_millis() as i64 {
            return Err(crate::Error::AlreadyClosed);
        }

        let refreshed = LockCell {
            owner: self.self_uuid,
            acquired_at_ms: now_ms,
        };
        tx.set(self.key.clone(), refreshed.encode_to_vec()?);
        tx.commit().await
    }

    /// Releases the lock if we still own it; a no-op (not an error) if we were already stolen from.
    pub async fn release(&self) -> crate::Result<()> {
        let tx = self.database.create_transaction().await?;
        let cell = match tx.get(&self.key).await? {
            Some(bytes) => LockCell::decode_from(&mut &bytes[..])?,
            None => return Ok(()),
        };

        if cell.owner == self.self_uuid {
            tx.clear(&self.key);
            tx.commit().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryDatabase;

    fn database() -> Arc<dyn Database> {
        Arc::new(MemoryDatabase::new())
    }

    #[tokio::test]
    async fn second_acquire_fails_while_fresh() {
        let db = database();
        let key = b"lock-a".to_vec();

        let _first = FileLock::acquire(db.clone(), key.clone(), Duration::from_secs(600))
            .await
            .unwrap();

        let second = FileLock::acquire(db.clone(), key.clone(), Duration::from_secs(600)).await;
        assert!(matches!(second, Err(crate::Error::LockHeld)));
    }

    #[tokio::test]
    async fn release_then_reacquire_succeeds() {
        let db = database();
        let key = b"lock-a".to_vec();

        let first = FileLock::acquire(db.clone(), key.clone(), Duration::from_secs(600))
            .await
            .unwrap();
        first.release().await.unwrap();

        let second = FileLock::acquire(db.clone(), key.clone(), Duration::from_secs(600)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn stale_lock_is_stolen() {
        let db = database();
        let key = b"lock-a".to_vec();

        // Simulate an acquisition far enough in the past to be stale.
        let stale_owner = Uuid::new_v4();
        let stale_cell = LockCell {
            owner: stale_owner,
            acquired_at_ms: 0,
        };
        let tx = db.create_transaction().await.unwrap();
        tx.set(key.clone(), stale_cell.encode_to_vec().unwrap());
        tx.commit().await.unwrap();

        let acquired = FileLock::acquire(db.clone(), key.clone(), Duration::from_secs(1)).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn ensure_valid_fails_after_foreign_steal() {
        let db = database();
        let key = b"lock-a".to_vec();

        let first = FileLock::acquire(db.clone(), key.clone(), Duration::from_millis(50))
            .await
            .unwrap();

        // Overwrite with a foreign owner directly, simulating a steal after staleness.
        let foreign = LockCell {
            owner: Uuid::new_v4(),
            acquired_at_ms: crate::time::unix_timestamp_millis() as i64,
        };
        let tx = db.create_transaction().await.unwrap();
        tx.set(key.clone(), foreign.encode_to_vec().unwrap());
        tx.commit().await.unwrap();

        assert!(matches!(
            first.ensure_valid().await,
            Err(crate::Error::AlreadyClosed)
        ));
    }
}
