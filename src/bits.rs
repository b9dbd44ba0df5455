//! Bit-level reading and writing over byte buffers, MSB first.
//!
//! Both directions sit on `bitstream_io`. [`BitCursor`] wraps a big-endian
//! `BitReader` over a borrowed slice and counts consumed bits so callers
//! can borrow sub-slices and check lengths; peeking reads from a clone.
//! [`BitWriter`] keeps the same count so callers can size stuffing.

use std::io;

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter as IoBitWriter};

use crate::error::{Result, ValidationError};

#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    reader: BitReader<&'a [u8], BigEndian>,
    consumed: usize,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            reader: BitReader::endian(data, BigEndian),
            consumed: 0,
        }
    }

    /// Byte offset of the current read position (rounded down).
    pub fn position(&self) -> usize {
        self.consumed / 8
    }

    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.consumed
    }

    /// Whole and partially consumed bytes left, counted from the current byte.
    pub fn bytes_remaining(&self) -> usize {
        self.data.len() - self.position()
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.reader.byte_aligned()
    }

    fn out_of_data(&self, needed: usize) -> ValidationError {
        ValidationError::OutOfData {
            needed,
            available: self.bits_remaining(),
        }
    }

    fn io_error(&self, err: io::Error, needed: usize) -> ValidationError {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => self.out_of_data(needed),
            _ => err.into(),
        }
    }

    /// Account for a read of `bits` bits, mapping EOF to `OutOfData`.
    fn track<T>(&mut self, bits: usize, read: io::Result<T>) -> Result<T> {
        match read {
            Ok(value) => {
                self.consumed += bits;
                Ok(value)
            }
            Err(err) => Err(self.io_error(err, bits)),
        }
    }

    fn bit_count(&self, bits: usize) -> Result<u32> {
        u32::try_from(bits).map_err(|_| self.out_of_data(bits))
    }

    /// Read up to 64 bits as an unsigned value.
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        debug_assert!(count <= 64);
        if count == 0 {
            return Ok(0);
        }
        let read = self.reader.read_var::<u64>(count);
        self.track(count as usize, read)
    }

    pub fn peek_bits(&self, count: u32) -> Result<u64> {
        self.clone().read_bits(count)
    }

    pub fn read_flag(&mut self) -> Result<bool> {
        let read = self.reader.read_bit();
        self.track(1, read)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let read = if self.is_byte_aligned() {
            self.reader.read_to::<u8>()
        } else {
            self.reader.read::<8, u8>()
        };
        self.track(8, read)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let read = if self.is_byte_aligned() {
            self.reader.read_to::<u16>()
        } else {
            self.reader.read::<16, u16>()
        };
        self.track(16, read)
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let read = if self.is_byte_aligned() {
            self.reader
                .read_to::<[u8; 3]>()
                .map(|[a, b, c]| u32::from_be_bytes([0, a, b, c]))
        } else {
            self.reader.read::<24, u32>()
        };
        self.track(24, read)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let read = if self.is_byte_aligned() {
            self.reader.read_to::<u32>()
        } else {
            self.reader.read::<32, u32>()
        };
        self.track(32, read)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let read = if self.is_byte_aligned() {
            self.reader.read_to::<u64>()
        } else {
            self.reader.read::<64, u64>()
        };
        self.track(64, read)
    }

    pub fn skip_bits(&mut self, count: usize) -> Result<()> {
        if count > self.bits_remaining() {
            return Err(self.out_of_data(count));
        }
        let bits = self.bit_count(count)?;
        let read = self.reader.skip(bits);
        self.track(count, read)
    }

    pub fn skip_bytes(&mut self, count: usize) -> Result<()> {
        self.skip_bits(count * 8)
    }

    /// Borrow the next `count` bytes. The cursor must be byte-aligned.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if !self.is_byte_aligned() {
            return Err(ValidationError::UnalignedRead);
        }
        let start = self.position();
        let Some(out) = self.data.get(start..start + count) else {
            return Err(self.out_of_data(count * 8));
        };
        self.skip_bits(count * 8)?;
        Ok(out)
    }

    /// Everything from the current (aligned) position to the end.
    pub fn remaining_slice(&self) -> Result<&'a [u8]> {
        if !self.is_byte_aligned() {
            return Err(ValidationError::UnalignedRead);
        }
        Ok(&self.data[self.position()..])
    }

    /// ue(v)
    pub fn read_exp_golomb_unsigned(&mut self) -> Result<u32> {
        let leading_zeros = match self.reader.read_unary::<1>() {
            Ok(zeros) => zeros,
            Err(err) => return Err(self.io_error(err, self.bits_remaining() + 1)),
        };
        self.consumed += leading_zeros as usize + 1;
        if leading_zeros > 31 {
            return Err(ValidationError::ExpGolombOverflow(leading_zeros));
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix) as u32)
    }

    /// se(v)
    pub fn read_exp_golomb_signed(&mut self) -> Result<i32> {
        let k = i64::from(self.read_exp_golomb_unsigned()?);
        let value = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Ok(value as i32)
    }

    /// 33-bit 90 kHz timestamp split as 3 + marker + 15 + marker + 15 + marker.
    /// The 4-bit prefix preceding it in PES headers is the caller's business.
    pub fn read_timestamp(&mut self) -> Result<u64> {
        let high = self.read_bits(3)?;
        self.skip_bits(1)?;
        let mid = self.read_bits(15)?;
        self.skip_bits(1)?;
        let low = self.read_bits(15)?;
        self.skip_bits(1)?;
        Ok((high << 30) | (mid << 15) | low)
    }
}

/// MSB-first bit writer producing a `Vec<u8>`.
pub struct BitWriter {
    inner: IoBitWriter<Vec<u8>, BigEndian>,
    bits_written: u64,
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            inner: IoBitWriter::endian(Vec::new(), BigEndian),
            bits_written: 0,
        }
    }

    /// Bytes written so far, counting a trailing partial byte as whole.
    pub fn byte_len(&self) -> usize {
        self.bits_written.div_ceil(8) as usize
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bits_written % 8 == 0
    }

    /// Write the low `count` bits of `value`; higher bits are discarded.
    pub fn write_bits(&mut self, count: u32, value: u64) -> Result<()> {
        debug_assert!(count <= 64);
        if count == 0 {
            return Ok(());
        }
        let masked = if count == 64 {
            value
        } else {
            value & ((1u64 << count) - 1)
        };
        self.inner.write_var::<u64>(count, masked)?;
        self.bits_written += u64::from(count);
        Ok(())
    }

    pub fn write_flag(&mut self, flag: bool) -> Result<()> {
        self.inner.write_bit(flag)?;
        self.bits_written += 1;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bits(8, u64::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bits(16, u64::from(value))
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bits(32, u64::from(value))
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.is_byte_aligned() {
            self.inner.write_bytes(bytes)?;
            self.bits_written += bytes.len() as u64 * 8;
            return Ok(());
        }
        for &b in bytes {
            self.write_u8(b)?;
        }
        Ok(())
    }

    pub fn write_stuffing(&mut self, byte: u8, count: usize) -> Result<()> {
        for _ in 0..count {
            self.write_u8(byte)?;
        }
        Ok(())
    }

    /// ue(v), including the single-bit code for 0.
    pub fn write_exp_golomb_unsigned(&mut self, value: u32) -> Result<()> {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros();
        self.write_bits(len - 1, 0)?;
        self.write_bits(len, code)
    }

    /// se(v)
    pub fn write_exp_golomb_signed(&mut self, value: i32) -> Result<()> {
        let v = i64::from(value);
        let mapped = if v > 0 { 2 * v - 1 } else { -2 * v };
        self.write_exp_golomb_unsigned(mapped as u32)
    }

    /// 4-bit prefix followed by a marker-split 33-bit timestamp.
    pub fn write_timestamp(&mut self, prefix: u8, timestamp: u64) -> Result<()> {
        self.write_bits(4, u64::from(prefix))?;
        self.write_marked_timestamp(timestamp)
    }

    /// 33-bit timestamp as 3 + marker + 15 + marker + 15 + marker.
    pub fn write_marked_timestamp(&mut self, timestamp: u64) -> Result<()> {
        self.write_bits(3, timestamp >> 30)?;
        self.write_flag(true)?;
        self.write_bits(15, timestamp >> 15)?;
        self.write_flag(true)?;
        self.write_bits(15, timestamp)?;
        self.write_flag(true)
    }

    /// Pad to a byte boundary with zero bits and return the buffer.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        self.inner.byte_align()?;
        Ok(self.inner.into_writer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_across_byte_boundaries() {
        let data = [0b1010_1100, 0b0101_0011];
        let mut r = BitCursor::new(&data);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_bits(7).unwrap(), 0b0110_001);
        assert_eq!(r.bits_remaining(), 6);
        assert_eq!(r.read_bits(6).unwrap(), 0b01_0011);
        assert_eq!(r.bits_remaining(), 0);
    }

    #[test]
    fn out_of_data_is_reported() {
        let data = [0xFF];
        let mut r = BitCursor::new(&data);
        r.skip_bits(5).unwrap();
        let err = r.read_bits(4).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfData {
                needed: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn peek_does_not_advance() {
        let data = [0x47, 0x40];
        let r = BitCursor::new(&data);
        assert_eq!(r.peek_bits(8).unwrap(), 0x47);
        assert_eq!(r.position(), 0);

        let mut r = BitCursor::new(&data);
        r.skip_bits(3).unwrap();
        assert_eq!(r.peek_bits(3).unwrap(), 0b001);
        assert_eq!(r.read_bits(3).unwrap(), 0b001);
        assert_eq!(r.bits_remaining(), 10);
    }

    #[test]
    fn whole_byte_reads_aligned_and_unaligned() {
        let data = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x10, 0x32, 0x54, 0x76, 0x98, 0xBA,
            0xDC, 0xFE, 0xFF, 0xFF, 0xFF,
        ];
        let mut r = BitCursor::new(&data);
        assert_eq!(r.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(r.read_u24().unwrap(), 0x10_3254);
        assert_eq!(r.read_u8().unwrap(), 0x76);
        assert_eq!(r.read_u16().unwrap(), 0x98BA);
        assert_eq!(r.position(), 14);
        assert!(r.is_byte_aligned());

        let mut r = BitCursor::new(&data);
        r.skip_bits(4).unwrap();
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0x5678_9ABC);
        assert_eq!(r.read_u64().unwrap(), 0xDEF1_0325_4769_8BAD);
        assert!(!r.is_byte_aligned());
        assert_eq!(r.bits_remaining(), 36);

        let err = r.read_u64().unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfData {
                needed: 64,
                available: 36
            }
        ));
    }

    #[test]
    fn borrowed_bytes_follow_the_cursor() {
        let data = [0xAA, 0xBB, 0xCC, 0xDD];
        let mut r = BitCursor::new(&data);
        r.skip_bytes(1).unwrap();
        assert_eq!(r.read_bytes(2).unwrap(), &[0xBB, 0xCC]);
        assert_eq!(r.remaining_slice().unwrap(), &[0xDD]);
        assert!(matches!(r.read_bytes(2), Err(ValidationError::OutOfData { .. })));

        r.skip_bits(1).unwrap();
        assert!(matches!(r.read_bytes(1), Err(ValidationError::UnalignedRead)));
    }

    #[test]
    fn truncated_exp_golomb_prefix_is_out_of_data() {
        let data = [0x00];
        let mut r = BitCursor::new(&data);
        assert!(matches!(
            r.read_exp_golomb_unsigned(),
            Err(ValidationError::OutOfData {
                needed: 9,
                available: 8
            })
        ));
    }

    #[test]
    fn exp_golomb_known_codes() {
        // 1 | 010 | 011 | 00100 | 00101
        let data = [0b1010_0110, 0b0100_0010, 0b1000_0000];
        let mut r = BitCursor::new(&data);
        assert_eq!(r.read_exp_golomb_unsigned().unwrap(), 0);
        assert_eq!(r.read_exp_golomb_unsigned().unwrap(), 1);
        assert_eq!(r.read_exp_golomb_unsigned().unwrap(), 2);
        assert_eq!(r.read_exp_golomb_unsigned().unwrap(), 3);
        assert_eq!(r.read_exp_golomb_signed().unwrap(), -2);
    }

    #[test]
    fn writer_handles_zero_for_ue() {
        let mut w = BitWriter::new();
        w.write_exp_golomb_unsigned(0).unwrap();
        w.write_exp_golomb_unsigned(4).unwrap();
        w.write_exp_golomb_signed(-3).unwrap();
        let bytes = w.into_bytes().unwrap();

        let mut r = BitCursor::new(&bytes);
        assert_eq!(r.read_exp_golomb_unsigned().unwrap(), 0);
        assert_eq!(r.read_exp_golomb_unsigned().unwrap(), 4);
        assert_eq!(r.read_exp_golomb_signed().unwrap(), -3);
    }

    #[test]
    fn timestamp_layout() {
        let mut w = BitWriter::new();
        w.write_timestamp(0b0010, 0x1_2345_6789).unwrap();
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes.len(), 5);
        assert_eq!(bytes[0] >> 4, 0b0010);
        assert_eq!(bytes[0] & 1, 1);

        let mut r = BitCursor::new(&bytes);
        r.skip_bits(4).unwrap();
        assert_eq!(r.read_timestamp().unwrap(), 0x1_2345_6789);
    }

    #[test]
    fn writer_masks_oversized_values() {
        let mut w = BitWriter::new();
        w.write_bits(2, 0xFF).unwrap();
        w.write_bits(6, 0).unwrap();
        assert_eq!(w.byte_len(), 1);
        assert_eq!(w.into_bytes().unwrap(), vec![0b1100_0000]);
    }
}
