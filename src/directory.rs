//! Virtual file directory over a data store and a metadata store.
//!
//! File bytes go to the data store through the row codec; lengths and the
//! file listing go to the metadata store. Locks live in the data store so
//! every process sharing it sees the same bids; their cells skip any
//! write-back cache in that store.
//!
//! There are no transactions across the two stores. A crash between a data
//! flush and the matching length flush leaves them out of step; the next
//! writer trusts the recorded length.

use crate::clock::{Clock, SystemClock};
use crate::config::DirectoryConfig;
use crate::error::{Error, Result};
use crate::lock::StoreLock;
use crate::meta::RowMeta;
use crate::row::{RowReader, RowWriter};
use crate::store::Store;
use std::sync::Arc;

pub type DynStore = Arc<dyn Store>;
pub type FileWriter = RowWriter<DynStore, DynStore>;
pub type FileReader = RowReader<DynStore>;
pub type FileLock = StoreLock<DynStore, DynStore>;

/// Columns moved per chunk by a byte copy.
const COPY_CHUNK_COLUMNS: usize = 16;

pub struct Directory {
    data: DynStore,
    meta: Arc<RowMeta<DynStore>>,
    config: DirectoryConfig,
    clock: Arc<dyn Clock>,
}

impl Directory {
    pub fn new(data: DynStore, meta: DynStore, config: DirectoryConfig) -> Self {
        Self::with_clock(data, meta, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        data: DynStore,
        meta: DynStore,
        config: DirectoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            data,
            meta: Arc::new(RowMeta::new(meta)),
            config,
            clock,
        }
    }

    pub fn with_fast_copy(mut self, enabled: bool) -> Self {
        self.config.fast_copy = enabled;
        self
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn data(&self) -> &DynStore {
        &self.data
    }

    pub fn list_all(&self) -> Result<Vec<String>> {
        self.meta.all_keys()
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        self.meta.exists(name)
    }

    pub fn length(&self, name: &str) -> Result<u64> {
        self.meta.length(name)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        if !self.exists(name)? {
            return Err(Error::NotFound(name.to_string()));
        }
        self.data.delete(name)?;
        self.meta.delete(name)
    }

    /// Flushes buffered data, then lengths.
    pub fn sync(&self) -> Result<()> {
        self.data.sync()?;
        self.meta.flush(false)?;
        self.meta.store().sync()
    }

    /// Opens `name` for appending, creating it if needed.
    pub fn open_writer(&self, name: &str) -> Result<FileWriter> {
        RowWriter::open(self.data.clone(), self.meta.clone(), name)
    }

    pub fn open_reader(&self, name: &str) -> Result<FileReader> {
        let length = self.meta.length(name)?;
        Ok(RowReader::new(self.data.clone(), name, length))
    }

    /// New handle on the lock `name`. Nothing is written until `obtain`.
    pub fn make_lock(&self, name: &str) -> FileLock {
        StoreLock::new(
            name,
            self.data.clone(),
            self.meta.clone(),
            self.config.lock.clone(),
            self.clock.clone(),
        )
    }

    /// Breaks `name` regardless of who holds it.
    pub fn clear_lock(&self, name: &str) -> Result<()> {
        tracing::warn!(lock = name, "Clearing lock");
        self.data.delete(name)?;
        self.meta.delete(name)
    }

    /// Copies `src` in `from` to `dest` in `to`, replacing `dest`.
    ///
    /// When both data stores are translated, fast copy is enabled on both and
    /// the column widths agree, `dest` is pointed at `src`'s physical row and
    /// `src` is dropped from `from`. Otherwise the bytes are copied and `src`
    /// is left in place. Linked stores must share one physical backend.
    /// Copying a file onto itself leaves it untouched.
    pub fn copy(from: &Directory, src: &str, to: &Directory, dest: &str) -> Result<()> {
        if std::ptr::eq(from, to) && src == dest {
            from.meta.length(src)?;
            return Ok(());
        }
        match Self::fast_copy(from, src, to, dest) {
            Err(Error::InvalidFastCopy(reason)) => {
                tracing::debug!(src, dest, reason = %reason, "Falling back to byte copy");
                Self::byte_copy(from, src, to, dest)
            }
            result => result,
        }
    }

    fn fast_copy(from: &Directory, src: &str, to: &Directory, dest: &str) -> Result<()> {
        if !from.config.fast_copy || !to.config.fast_copy {
            return Err(Error::InvalidFastCopy("fast copy disabled".to_string()));
        }
        let (Some(src_linker), Some(dest_linker)) = (from.data.linker(), to.data.linker()) else {
            return Err(Error::InvalidFastCopy("store is not translated".to_string()));
        };
        if from.data.col_size() != to.data.col_size() {
            return Err(Error::InvalidFastCopy(format!(
                "column sizes differ: {} vs {}",
                from.data.col_size(),
                to.data.col_size()
            )));
        }

        let length = from.meta.length(src)?;
        to.remove_if_exists(dest)?;

        let physical = src_linker.translate(src)?;
        dest_linker.link(dest, &physical)?;
        to.meta.set_length(dest, length, true)?;

        from.meta.delete(src)?;
        src_linker.unlink(src)?;

        tracing::debug!(src, dest, physical = %physical, length, "Fast copied file");
        Ok(())
    }

    fn byte_copy(from: &Directory, src: &str, to: &Directory, dest: &str) -> Result<()> {
        let mut reader = from.open_reader(src)?;
        to.remove_if_exists(dest)?;
        let mut writer = to.open_writer(dest)?;

        let chunk = (from.data.col_size() * COPY_CHUNK_COLUMNS).max(1);
        let mut offset = 0u64;
        while offset < reader.length() {
            let n = chunk.min((reader.length() - offset) as usize);
            writer.write_bytes(&reader.read_bytes(offset, n)?)?;
            offset += n as u64;
        }
        writer.close()
    }

    fn remove_if_exists(&self, name: &str) -> Result<()> {
        if self.exists(name)? {
            self.data.delete(name)?;
            self.meta.delete(name)?;
        }
        Ok(())
    }
}
