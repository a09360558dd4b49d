//! CRC-64-ISO checksum utilities.

use crc::{Crc, CRC_64_GO_ISO};

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Compute CRC-64 checksum for a byte slice.
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Fold a 64-bit checksum into the 32-bit facade checksum carried by hints.
pub fn fold(csum: u64) -> u32 {
    (csum as u32) ^ ((csum >> 32) as u32)
}

/// Incremental CRC-64 digest.
pub struct Digest {
    digest: crc::Digest<'static, u64>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u64 {
        self.digest.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}
