//! Spreads the columns of one logical row across several physical rows.
//!
//! Column `c` of logical row `k` lives in physical row `k + delimiter + (c % splits)`.
//! Backends that penalize wide rows see `splits` rows of bounded width instead
//! of one long one.

use super::Store;
use crate::config::SplitConfig;
use crate::error::Result;
use itertools::Itertools;

#[derive(Debug)]
pub struct SplitStore<S: Store> {
    inner: S,
    splits: u64,
    delimiter: String,
}

impl<S: Store> SplitStore<S> {
    pub fn new(config: SplitConfig, inner: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            splits: config.splits,
            delimiter: config.delimiter,
        })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Physical row holding column `col` of `key`.
    pub fn shard_key(&self, key: &str, col: u64) -> String {
        format!("{}{}{}", key, self.delimiter, col % self.splits)
    }

    fn shard_keys<'a>(&'a self, key: &'a str) -> impl Iterator<Item = String> + 'a {
        (0..self.splits).map(move |shard| self.shard_key(key, shard))
    }
}

impl<S: Store> Store for SplitStore<S> {
    fn put(&self, key: &str, col: u64, value: &[u8]) -> Result<()> {
        self.inner.put(&self.shard_key(key, col), col, value)
    }

    fn get(&self, key: &str, col: u64) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.shard_key(key, col), col)
    }

    fn delete(&self, key: &str) -> Result<()> {
        for shard in self.shard_keys(key) {
            self.inner.delete(&shard)?;
        }
        Ok(())
    }

    fn delete_col(&self, key: &str, col: u64) -> Result<()> {
        self.inner.delete_col(&self.shard_key(key, col), col)
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        for shard in self.shard_keys(key) {
            if self.inner.has_key(&shard)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn all_values(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let mut values = Vec::new();
        for shard in self.shard_keys(key) {
            values.extend(self.inner.all_values(&shard)?);
        }
        Ok(values)
    }

    fn col_size(&self) -> usize {
        self.inner.col_size()
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        // Strip only the last delimiter: logical keys may contain it too.
        Ok(self
            .inner
            .all_keys()?
            .into_iter()
            .map(|physical| match physical.rsplit_once(self.delimiter.as_str()) {
                Some((logical, _)) => logical.to_string(),
                None => physical,
            })
            .unique()
            .collect())
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}
