//! CRC-32/MPEG-2 as used by PSI sections.
//!
//! Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no reflection, no
//! final XOR. Running a valid section *including* its CRC_32 field through
//! the checksum yields 0.

use crc::{CRC_32_MPEG_2, Crc};

pub const CRC_MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

pub fn crc_init() -> u32 {
    CRC_32_MPEG_2.init
}

/// Feed more bytes into a running checksum.
pub fn crc_update(crc: u32, bytes: &[u8]) -> u32 {
    let mut digest = CRC_MPEG2.digest_with_initial(crc);
    digest.update(bytes);
    digest.finalize()
}

pub fn crc_finalize(crc: u32) -> u32 {
    crc ^ CRC_32_MPEG_2.xorout
}

/// One-shot checksum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u32 {
    CRC_MPEG2.checksum(bytes)
}
