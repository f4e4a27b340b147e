//! Frame checksums.
//!
//! MSP v1 uses a running XOR over `len`, `cmd` and the payload. MSP v2 uses
//! CRC-8/DVB-S2 (poly 0xD5, MSB first, init 0) over `flags`, `cmd`, `len` and
//! the payload.

use crc::{Crc, CRC_8_DVB_S2};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_DVB_S2);

/// XOR checksum used by MSP v1.
#[inline]
#[must_use]
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// CRC-8/DVB-S2 of a byte slice.
#[inline]
#[must_use]
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// Incremental CRC-8/DVB-S2, fed while a v2 frame is assembled or scanned.
pub struct Crc8Digest {
    digest: crc::Digest<'static, u8>,
}

impl Crc8Digest {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            digest: CRC8.digest(),
        }
    }

    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    #[inline]
    #[must_use]
    pub fn finalize(self) -> u8 {
        self.digest.finalize()
    }
}

impl Default for Crc8Digest {
    fn default() -> Self {
        Self::new()
    }
}
