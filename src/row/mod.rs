//! Row codec: a logical byte stream laid over a row's fixed-width columns.
//!
//! Byte `p` of a file lives in column `p / col_size` at offset
//! `p % col_size`. Bytes that were never written read back as zero.

mod reader;
mod writer;

pub use reader::RowReader;
pub use writer::RowWriter;

/// Column index and intra-column offset of byte `pos`.
pub(crate) fn locate(pos: u64, col_size: usize) -> (u64, usize) {
    let col_size = col_size as u64;
    (pos / col_size, (pos % col_size) as usize)
}
