//! Process-local store backed by a concurrent skip list.
//!
//! Entries are keyed by `(row, column)` so a row is a contiguous range of the
//! map, which makes row scans and row deletes simple range walks. Readers
//! never block; there is no coordination beyond what the skip list gives.

use super::Store;
use crate::error::Result;
use crossbeam_skiplist::SkipMap;
use std::ops::RangeInclusive;

#[derive(Debug)]
pub struct MemoryStore {
    col_size: usize,
    data: SkipMap<(String, u64), Vec<u8>>,
}

impl MemoryStore {
    pub fn new(col_size: usize) -> Self {
        Self {
            col_size,
            data: SkipMap::new(),
        }
    }

    /// Number of stored columns across all rows.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Column indexes present in a row, ascending.
    pub fn columns(&self, key: &str) -> Vec<u64> {
        self.data
            .range(row_range(key))
            .map(|entry| entry.key().1)
            .collect()
    }
}

fn row_range(key: &str) -> RangeInclusive<(String, u64)> {
    (key.to_string(), 0)..=(key.to_string(), u64::MAX)
}

impl Store for MemoryStore {
    fn put(&self, key: &str, col: u64, value: &[u8]) -> Result<()> {
        self.data.insert((key.to_string(), col), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str, col: u64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .data
            .get(&(key.to_string(), col))
            .map(|entry| entry.value().clone()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        for entry in self.data.range(row_range(key)) {
            entry.remove();
        }
        Ok(())
    }

    fn delete_col(&self, key: &str, col: u64) -> Result<()> {
        self.data.remove(&(key.to_string(), col));
        Ok(())
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.data.range(row_range(key)).next().is_some())
    }

    fn all_values(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .data
            .range(row_range(key))
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn col_size(&self) -> usize {
        self.col_size
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = Vec::new();
        for entry in self.data.iter() {
            let key = &entry.key().0;
            if keys.last() != Some(key) {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() -> Result<()> {
        let store = MemoryStore::new(4);
        store.put("a", 0, b"abcd")?;
        store.put("a", 7, b"efgh")?;

        assert_eq!(store.get("a", 0)?, Some(b"abcd".to_vec()));
        assert_eq!(store.get("a", 7)?, Some(b"efgh".to_vec()));
        assert_eq!(store.get("a", 1)?, None);
        assert_eq!(store.get("b", 0)?, None);
        assert_eq!(store.col_size(), 4);
        Ok(())
    }

    #[test]
    fn test_absent_is_not_zero() -> Result<()> {
        let store = MemoryStore::new(4);
        store.put("z", 0, &[0, 0, 0, 0])?;
        assert_eq!(store.get("z", 0)?, Some(vec![0; 4]));
        assert_eq!(store.get("z", 1)?, None);
        Ok(())
    }

    #[test]
    fn test_rows_do_not_bleed() -> Result<()> {
        let store = MemoryStore::new(4);
        store.put("a", u64::MAX, b"last")?;
        store.put("ab", 0, b"next")?;
        store.put("b", 0, b"rowb")?;

        assert_eq!(store.all_values("a")?, vec![b"last".to_vec()]);
        store.delete("a")?;
        assert!(!store.has_key("a")?);
        assert!(store.has_key("ab")?);
        assert!(store.has_key("b")?);
        Ok(())
    }

    #[test]
    fn test_delete_col_and_row() -> Result<()> {
        let store = MemoryStore::new(4);
        for col in 0..5 {
            store.put("row", col, &[col as u8; 4])?;
        }
        store.delete_col("row", 2)?;
        assert_eq!(store.columns("row"), vec![0, 1, 3, 4]);

        store.delete("row")?;
        assert!(!store.has_key("row")?);
        assert_eq!(store.get("row", 0)?, None);
        assert!(store.all_keys()?.is_empty());
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn test_all_keys_deduplicates() -> Result<()> {
        let store = MemoryStore::new(4);
        for col in 0..3 {
            store.put("x", col, b"....")?;
            store.put("y", col, b"....")?;
        }
        assert_eq!(store.all_keys()?, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(store.len(), 6);
        Ok(())
    }
}
