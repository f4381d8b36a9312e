//! Logical-to-physical key indirection.
//!
//! A translated store never writes data under the caller's key. Each logical
//! key maps to a random physical key, and the mapping itself lives in column 0
//! of a row in a separate mapping store. Repointing a mapping is how a file is
//! "copied" or renamed without moving its bytes.

mod striped;

pub use striped::StripedLock;

use crate::error::{Error, Result};
use crate::store::{Linker, Store};
use rand::distr::Alphanumeric;
use rand::Rng;

const MAPPING_COL: u64 = 0;

pub trait Translator: Send + Sync {
    /// Physical key for `key`, creating a new one on first access.
    fn translate(&self, key: &str) -> Result<String>;

    /// Replaces the mapping for `key`.
    fn set_translation(&self, key: &str, physical: &str) -> Result<()>;

    /// Removes the mapping for `key`.
    fn unset(&self, key: &str) -> Result<()>;
}

/// Translator that persists mappings in a [`Store`]. New physical keys are
/// random alphanumeric strings as long as the mapping store's column width.
pub struct TableTranslator<S: Store> {
    mappings: S,
    locks: StripedLock,
}

impl<S: Store> TableTranslator<S> {
    pub fn new(mappings: S) -> Self {
        Self {
            mappings,
            locks: StripedLock::default(),
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<String>> {
        match self.mappings.get(key, MAPPING_COL)? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                Error::InvalidData(format!("translation for {} is not utf-8: {}", key, e))
            }),
            None => Ok(None),
        }
    }

    fn random_key(&self) -> String {
        rand::rng()
            .sample_iter(Alphanumeric)
            .take(self.mappings.col_size())
            .map(char::from)
            .collect()
    }
}

impl<S: Store> Translator for TableTranslator<S> {
    fn translate(&self, key: &str) -> Result<String> {
        if let Some(physical) = self.lookup(key)? {
            return Ok(physical);
        }

        let _guard = self.locks.lock(key);
        // Another thread may have created it while we waited.
        if let Some(physical) = self.lookup(key)? {
            return Ok(physical);
        }
        let physical = self.random_key();
        self.mappings.put(key, MAPPING_COL, physical.as_bytes())?;
        tracing::debug!(key, physical = %physical, "Created translation");
        Ok(physical)
    }

    fn set_translation(&self, key: &str, physical: &str) -> Result<()> {
        let _guard = self.locks.lock(key);
        self.mappings.put(key, MAPPING_COL, physical.as_bytes())
    }

    fn unset(&self, key: &str) -> Result<()> {
        let _guard = self.locks.lock(key);
        self.mappings.delete(key)
    }
}

/// Store decorator that routes every key through a [`Translator`].
pub struct TranslateStore<T: Translator, S: Store> {
    translator: T,
    inner: S,
}

impl<T: Translator, S: Store> TranslateStore<T, S> {
    pub fn new(translator: T, inner: S) -> Self {
        Self { translator, inner }
    }

    pub fn translator(&self) -> &T {
        &self.translator
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<T: Translator, S: Store> Store for TranslateStore<T, S> {
    fn put(&self, key: &str, col: u64, value: &[u8]) -> Result<()> {
        self.inner.put(&self.translator.translate(key)?, col, value)
    }

    fn get(&self, key: &str, col: u64) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.translator.translate(key)?, col)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.translator.translate(key)?)?;
        self.translator.unset(key)
    }

    fn delete_col(&self, key: &str, col: u64) -> Result<()> {
        self.inner.delete_col(&self.translator.translate(key)?, col)
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        self.inner.has_key(&self.translator.translate(key)?)
    }

    fn all_values(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.inner.all_values(&self.translator.translate(key)?)
    }

    fn col_size(&self) -> usize {
        self.inner.col_size()
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        Err(Error::InvalidState(
            "translated stores cannot enumerate logical keys".to_string(),
        ))
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn linker(&self) -> Option<&dyn Linker> {
        Some(self)
    }
}

impl<T: Translator, S: Store> Linker for TranslateStore<T, S> {
    fn translate(&self, key: &str) -> Result<String> {
        self.translator.translate(key)
    }

    fn link(&self, key: &str, physical: &str) -> Result<()> {
        self.translator.set_translation(key, physical)
    }

    fn unlink(&self, key: &str) -> Result<()> {
        self.translator.unset(key)
    }
}
