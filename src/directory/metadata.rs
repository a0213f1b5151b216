// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Name-to-id mapping and `FileRef` storage shared by the writer, reader and top-level
//! `Directory`. Everything here lives under one directory's subspace:
//!
//! ```text
//! prefix / "n" / <name>      -> file id (8 bytes, big-endian)
//! prefix / "f" / <file id>   -> encoded FileRef
//! prefix / "c"               -> next file id counter (8 bytes, big-endian)
//! prefix / "b" / <file id> / <block no> -> encoded block (written directly by KvWriter/KvReader)
//! ```

use super::file_ref::{FileId, FileRef};
use crate::coding::{Decode, Encode};
use crate::kv::Database;
use std::sync::Arc;

pub fn name_key(prefix: &[u8], name: &str) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.push(b'n');
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn file_ref_key(prefix: &[u8], file_id: FileId) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.push(b'f');
    key.extend_from_slice(&file_id.to_be_bytes());
    key
}

pub fn counter_key(prefix: &[u8]) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.push(b'c');
    key
}

pub fn block_prefix(prefix: &[u8], file_id: FileId) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.push(b'b');
    key.extend_from_slice(&file_id.to_be_bytes());
    key
}

pub async fn lookup_file_id(
    database: &Arc<dyn Database>,
    prefix: &[u8],
    name: &str,
) -> crate::Result<Option<FileId>> {
    let tx = database.create_transaction().await?;
    let key = name_key(prefix, name);
    match tx.get(&key).await? {
        Some(bytes) if bytes.len() == 8 => {
            let mut array = [0u8; 8];
            array.copy_from_slice(&bytes);
            Ok(Some(u64::from_be_bytes(array)))
        }
        Some(_) | None => Ok(None),
    }
}

pub async fn allocate_file_id(database: &Arc<dyn Database>, prefix: &[u8]) -> crate::Result<FileId> {
    let tx = database.create_transaction().await?;
    let key = counter_key(prefix);
    let current = match tx.get(&key).await? {
        Some(bytes) if bytes.len() == 8 => {
            let mut array = [0u8; 8];
            array.copy_from_slice(&bytes);
            u64::from_be_bytes(array)
        }
        Some(_) | None => 0,
    };
    let next = current + 1;
    tx.set(key, next.to_be_bytes().to_vec());
    tx.commit().await?;
    Ok(next)
}

pub async fn bind_name(
    database: &Arc<dyn Database>,
    prefix: &[u8],
    name: &str,
    file_id: FileId,
) -> crate::Result<()> {
    let tx = database.create_transaction().await?;
    tx.set(name_key(prefix, name), file_id.to_be_bytes().to_vec());
    tx.commit().await
}

pub async fn get_file_ref(
    database: &Arc<dyn Database>,
    prefix: &[u8],
    file_id: FileId,
) -> crate::Result<Option<FileRef>> {
    let tx = database.create_transaction().await?;
    let key = file_ref_key(prefix, file_id);
    match tx.get(&key).await? {
        Some(bytes) => Ok(Some(FileRef::decode_from(&mut &bytes[..])?)),
        None => Ok(None),
    }
}

pub fn put_file_ref(
    runtime: &tokio::runtime::Handle,
    database: &Arc<dyn Database>,
    prefix_and_file_id: (&[u8], FileId),
    file_ref: &FileRef,
) -> crate::Result<()> {
    let (prefix, file_id) = prefix_and_file_id;
    let key = file_ref_key(prefix, file_id);
    let encoded = file_ref.encode_to_vec()?;
    let database = database.clone();
    runtime.block_on(async move {
        let tx = database.create_transaction().await?;
        tx.set(key, encoded);
        tx.commit().await
    })
}

/// Removes a file's name binding, its `FileRef`, and every block belonging to it.
pub async fn delete_file(
    database: &Arc<dyn Database>,
    prefix: &[u8],
    name: &str,
    file_id: FileId,
) -> crate::Result<()> {
    let tx = database.create_transaction().await?;
    tx.clear(&name_key(prefix, name));
    tx.clear(&file_ref_key(prefix, file_id));
    let block_prefix = block_prefix(prefix, file_id);
    let mut block_prefix_end = block_prefix.clone();
    block_prefix_end.push(0xFF);
    tx.clear_range(block_prefix..block_prefix_end);
    tx.commit().await
}

/// Renames `old_name` to `new_name` in place: the underlying file id, `FileRef` and blocks are
/// untouched, only the name binding moves. Read old fileRef, write under new name, delete old
/// name — one sub-transaction, so a reader never observes both names bound or neither.
pub async fn rename(
    database: &Arc<dyn Database>,
    prefix: &[u8],
    old_name: &str,
    new_name: &str,
) -> crate::Result<()> {
    let tx = database.create_transaction().await?;
    let old_key = name_key(prefix, old_name);

    let file_id = match tx.get(&old_key).await? {
        Some(bytes) if bytes.len() == 8 => {
            let mut array = [0u8; 8];
            array.copy_from_slice(&bytes);
            u64::from_be_bytes(array)
        }
        _ => return Err(crate::Error::FileNotFound(old_name.to_owned())),
    };

    if tx.get(&file_ref_key(prefix, file_id)).await?.is_none() {
        return Err(crate::Error::FileNotFound(old_name.to_owned()));
    }

    tx.set(name_key(prefix, new_name), file_id.to_be_bytes().to_vec());
    tx.clear(&old_key);
    tx.commit().await
}

/// Lists every file name currently bound in this directory's subspace.
pub async fn list_names(database: &Arc<dyn Database>, prefix: &[u8]) -> crate::Result<Vec<String>> {
    let tx = database.create_transaction().await?;
    let mut begin = prefix.to_vec();
    begin.push(b'n');
    let mut end = prefix.to_vec();
    end.push(b'n' + 1);

    let pairs = tx.get_range(begin.clone()..end).await?;
    let mut names = Vec::with_capacity(pairs.len());
    for (key, _) in pairs {
        let name_bytes = &key[begin.len()..];
        if let Ok(name) = String::from_utf8(name_bytes.to_vec()) {
            names.push(name);
        }
    }
    Ok(names)
}
