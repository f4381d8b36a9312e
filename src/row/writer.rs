use crate::cache::CachingStore;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::hasher::Hasher;
use crate::meta::RowMeta;
use crate::row::locate;
use crate::store::Store;
use std::io;
use std::sync::Arc;

/// Append-only writer for one file.
///
/// Columns are assembled in a private write-back cache and reach the store on
/// [`RowWriter::flush`] or [`RowWriter::close`]. The file length is updated
/// (uncommitted) after every append.
pub struct RowWriter<S: Store, M: Store> {
    key: String,
    cache: CachingStore<S>,
    meta: Arc<RowMeta<M>>,
    pointer: u64,
    hasher: Hasher,
}

impl<S: Store, M: Store> RowWriter<S, M> {
    /// Opens `key` for appending after its current length. A file with no
    /// metadata starts empty.
    pub fn open(store: S, meta: Arc<RowMeta<M>>, key: &str) -> Result<Self> {
        if store.col_size() == 0 {
            return Err(Error::InvalidConfig("column size must be non-zero".to_string()));
        }
        let pointer = match meta.length(key) {
            Ok(len) => len,
            Err(e) if e.is_not_found() => {
                meta.set_length(key, 0, false)?;
                0
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            key: key.to_string(),
            cache: CachingStore::new(store, CacheConfig::default()),
            meta,
            pointer,
            hasher: Hasher::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Offset the next byte will be written at.
    pub fn file_pointer(&self) -> u64 {
        self.pointer
    }

    /// CRC-32 of the bytes written through this handle.
    pub fn checksum(&self) -> u32 {
        self.hasher.checksum()
    }

    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_bytes(&[b])
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let col_size = self.cache.col_size();
        let mut pos = self.pointer;
        let mut rest = buf;

        while !rest.is_empty() {
            let (col, off) = locate(pos, col_size);
            let n = (col_size - off).min(rest.len());

            // Keep whatever the column already holds around the new run.
            let mut cell = self.cache.get(&self.key, col)?.unwrap_or_default();
            if cell.len() < col_size {
                cell.resize(col_size, 0);
            }
            cell[off..off + n].copy_from_slice(&rest[..n]);
            self.cache.put(&self.key, col, &cell)?;

            pos += n as u64;
            rest = &rest[n..];
        }

        self.hasher.write(buf);
        self.pointer = pos;
        self.meta.set_length(&self.key, pos, false)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush(true)?;
        self.meta.flush(false)
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        tracing::debug!(key = %self.key, length = self.pointer, "Closed writer");
        Ok(())
    }
}

impl<S: Store, M: Store> io::Write for RowWriter<S, M> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        RowWriter::flush(self).map_err(Into::into)
    }
}
