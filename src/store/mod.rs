//! Row/column stores.
//!
//! Every backend exposes the same narrow contract: rows addressed by a string
//! key, each holding a sparse map from a 64-bit column index to a blob of at
//! most `col_size()` bytes. Column `n` of a file row holds bytes
//! `n * col_size .. (n + 1) * col_size` of the file.
//!
//! Backends and decorators compose by construction:
//!
//! ```text
//! TranslateStore<CachingStore<SplitStore<WideColumnStore<S>>>>
//! ```
//!
//! Errors from the innermost backend surface unchanged; nothing in this crate
//! retries a failed call.

pub mod column;
pub mod memory;
pub mod split;

use crate::error::Result;
use std::sync::Arc;

pub use column::{ColumnSession, WideColumnStore};
pub use memory::MemoryStore;
pub use split::SplitStore;

pub trait Store: Send + Sync {
    /// Stores a column value, replacing any previous value.
    fn put(&self, key: &str, col: u64, value: &[u8]) -> Result<()>;

    /// Retrieves a column value. `None` means the column was never written,
    /// which is distinct from a column written as zeros.
    fn get(&self, key: &str, col: u64) -> Result<Option<Vec<u8>>>;

    /// Removes an entire row.
    fn delete(&self, key: &str) -> Result<()>;

    /// Removes a single column.
    fn delete_col(&self, key: &str, col: u64) -> Result<()>;

    /// Returns true if the row has at least one column.
    fn has_key(&self, key: &str) -> Result<bool>;

    /// Every value in a row, in no particular order. Only meant for short rows
    /// (metadata, key lists, lock bids), never for file data rows.
    fn all_values(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    /// Width in bytes of every column in this store.
    fn col_size(&self) -> usize;

    /// Every row key present in the store.
    fn all_keys(&self) -> Result<Vec<String>>;

    /// Persists buffered writes. Stores without buffering have nothing to do.
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Indirection capability used for pointer-swap copies. Only stores that
    /// translate logical keys to physical keys return `Some`.
    fn linker(&self) -> Option<&dyn Linker> {
        None
    }

    /// The store beneath any write-back buffering, for cells other processes
    /// must see on every call. `None` when this store buffers nothing.
    fn uncached(&self) -> Option<&dyn Store> {
        None
    }
}

/// Logical-to-physical key indirection exposed by translated stores.
pub trait Linker {
    /// Physical key currently backing `key`, created on first use.
    fn translate(&self, key: &str) -> Result<String>;

    /// Points `key` at an existing physical row, replacing any previous mapping.
    fn link(&self, key: &str, physical: &str) -> Result<()>;

    /// Drops the mapping for `key` without touching the physical row.
    fn unlink(&self, key: &str) -> Result<()>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn put(&self, key: &str, col: u64, value: &[u8]) -> Result<()> {
        (**self).put(key, col, value)
    }

    fn get(&self, key: &str, col: u64) -> Result<Option<Vec<u8>>> {
        (**self).get(key, col)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn delete_col(&self, key: &str, col: u64) -> Result<()> {
        (**self).delete_col(key, col)
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        (**self).has_key(key)
    }

    fn all_values(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        (**self).all_values(key)
    }

    fn col_size(&self) -> usize {
        (**self).col_size()
    }

    fn all_keys(&self) -> Result<Vec<String>> {
        (**self).all_keys()
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }

    fn linker(&self) -> Option<&dyn Linker> {
        (**self).linker()
    }

    fn uncached(&self) -> Option<&dyn Store> {
        (**self).uncached()
    }
}
