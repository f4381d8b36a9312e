use std::fmt;

use crc::{Crc, Digest, CRC_32_ISO_HDLC, CRC_64_ECMA_182};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Incremental CRC-32 over the bytes appended to a file.
#[derive(Clone)]
pub struct Hasher {
    digest: Digest<'static, u32>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher({:08x})", self.checksum())
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Checksum of everything written so far. Writing may continue afterwards.
    pub fn checksum(&self) -> u32 {
        self.digest.clone().finalize()
    }

    pub fn reset(&mut self) {
        self.digest = CRC32.digest();
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable 64-bit hash of a key, identical in every process.
pub fn key_hash(key: &str) -> u64 {
    CRC64.checksum(key.as_bytes())
}
