//! Per-file metadata: length and enumeration.
//!
//! A file's length cannot be recovered from its data row (the tail column is
//! zero-padded), so it is kept in its own metadata row: column 0 holds the
//! length as a big-endian u64. A shared key-list row records every file that
//! has been persisted, one column per file at the CRC-64 of its metadata key.
//!
//! Lengths are cached in memory. Uncommitted updates stay dirty until
//! [`RowMeta::flush`].

use crate::error::{Error, Result};
use crate::hasher::key_hash;
use crate::store::Store;
use byteorder::{BigEndian, ByteOrder};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

const META_PREFIX: &str = "__colfs_meta__/";
const KEY_LIST: &str = "__colfs_meta_keys__";
const LENGTH_COL: u64 = 0;

pub struct RowMeta<S: Store> {
    store: S,
    cache: RwLock<HashMap<String, u64>>,
    dirty: Mutex<HashSet<String>>,
}

impl<S: Store> RowMeta<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Recorded length of `key`, or [`Error::NotFound`] if it has none.
    pub fn length(&self, key: &str) -> Result<u64> {
        if let Some(len) = self.cache.read().unwrap().get(key) {
            return Ok(*len);
        }

        let cell = self
            .store
            .get(&meta_key(key), LENGTH_COL)?
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if cell.len() < 8 {
            return Err(Error::InvalidData(format!(
                "length cell for {} has {} bytes",
                key,
                cell.len()
            )));
        }
        let len = BigEndian::read_u64(&cell);

        // A concurrent set_length wins over what we just read.
        Ok(*self
            .cache
            .write()
            .unwrap()
            .entry(key.to_string())
            .or_insert(len))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        if self.cache.read().unwrap().contains_key(key) {
            return Ok(true);
        }
        self.store.has_key(&meta_key(key))
    }

    /// Updates the cached length. With `commit` the length and the key-list
    /// entry are written through immediately; otherwise `key` is marked dirty.
    pub fn set_length(&self, key: &str, length: u64, commit: bool) -> Result<()> {
        self.cache.write().unwrap().insert(key.to_string(), length);
        if commit {
            self.persist(key, length)?;
            self.dirty.lock().unwrap().remove(key);
        } else {
            self.dirty.lock().unwrap().insert(key.to_string());
        }
        Ok(())
    }

    /// Persists every dirty length. With `clear` the in-memory cache is
    /// dropped afterwards.
    pub fn flush(&self, clear: bool) -> Result<()> {
        let pending: Vec<String> = self.dirty.lock().unwrap().drain().collect();

        for (i, key) in pending.iter().enumerate() {
            let Some(length) = self.cache.read().unwrap().get(key).copied() else {
                continue;
            };
            if let Err(e) = self.persist(key, length) {
                self.dirty
                    .lock()
                    .unwrap()
                    .extend(pending[i..].iter().cloned());
                return Err(e);
            }
        }

        if clear {
            let dirty = self.dirty.lock().unwrap();
            self.cache
                .write()
                .unwrap()
                .retain(|key, _| dirty.contains(key));
        }
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.dirty.lock().unwrap().remove(key);
        self.cache.write().unwrap().remove(key);

        let meta = meta_key(key);
        self.store.delete(&meta)?;
        self.store.delete_col(KEY_LIST, key_hash(&meta))
    }

    /// Every known file, persisted or still dirty, sorted.
    pub fn all_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for value in self.store.all_values(KEY_LIST)? {
            let meta = String::from_utf8(value)
                .map_err(|e| Error::InvalidData(format!("key list entry is not utf-8: {}", e)))?;
            if let Some(key) = meta.strip_prefix(META_PREFIX) {
                keys.push(key.to_string());
            }
        }
        keys.extend(self.dirty.lock().unwrap().iter().cloned());
        Ok(keys.into_iter().sorted().dedup().collect())
    }

    fn persist(&self, key: &str, length: u64) -> Result<()> {
        let meta = meta_key(key);
        let mut cell = [0u8; 8];
        BigEndian::write_u64(&mut cell, length);
        self.store.put(&meta, LENGTH_COL, &cell)?;
        self.store.put(KEY_LIST, key_hash(&meta), meta.as_bytes())
    }
}

fn meta_key(key: &str) -> String {
    format!("{}{}", META_PREFIX, key)
}
