use crate::error::{Error, Result};
use crate::row::locate;
use crate::store::Store;
use std::io;

/// Random-access reader for one file, with a cursor for `Read`/`Seek`.
///
/// The length is fixed when the reader is opened; the cursor stops there,
/// but offset reads past it return zeros like any unwritten byte.
pub struct RowReader<S: Store> {
    key: String,
    store: S,
    length: u64,
    pos: u64,
    /// Last fetched column, reused by adjacent reads.
    current: Option<(u64, Vec<u8>)>,
}

impl<S: Store> RowReader<S> {
    pub fn new(store: S, key: &str, length: u64) -> Self {
        Self {
            key: key.to_string(),
            store,
            length,
            pos: 0,
            current: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn read_byte(&mut self, offset: u64) -> Result<u8> {
        let (col, off) = locate(offset, self.col_size()?);
        let cell = self.column(col)?;
        Ok(cell.get(off).copied().unwrap_or(0))
    }

    pub fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let col_size = self.col_size()?;
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;

        while out.len() < len {
            let (col, off) = locate(pos, col_size);
            let n = (col_size - off).min(len - out.len());
            let cell = self.column(col)?;
            let end = (off + n).min(cell.len());
            if off < end {
                out.extend_from_slice(&cell[off..end]);
            }
            // Short or absent column.
            out.resize(out.len() + (off + n - end.max(off)), 0);
            pos += n as u64;
        }
        Ok(out)
    }

    fn col_size(&self) -> Result<usize> {
        match self.store.col_size() {
            0 => Err(Error::InvalidConfig("column size must be non-zero".to_string())),
            n => Ok(n),
        }
    }

    fn column(&mut self, col: u64) -> Result<&[u8]> {
        let cached = matches!(&self.current, Some((c, _)) if *c == col);
        if !cached {
            let cell = self.store.get(&self.key, col)?.unwrap_or_default();
            self.current = Some((col, cell));
        }
        Ok(self
            .current
            .as_ref()
            .map(|(_, cell)| cell.as_slice())
            .unwrap_or_default())
    }
}

impl<S: Store> io::Read for RowReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        let bytes = self.read_bytes(self.pos, n)?;
        buf[..n].copy_from_slice(&bytes);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: Store> io::Seek for RowReader<S> {
    fn seek(&mut self, from: io::SeekFrom) -> io::Result<u64> {
        let target = match from {
            io::SeekFrom::Start(p) => Some(p),
            io::SeekFrom::End(d) => self.length.checked_add_signed(d),
            io::SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            )),
        }
    }
}
