// psi/section.rs
//! Generic PSI section framing with CRC-32 (MPEG-2) validation.

use tracing::debug;

use crate::bits::{BitCursor, BitWriter};
use crate::constants::MAX_SECTION_LEN;
use crate::crc32;
use crate::error::{Result, ValidationError};

/// CRC_32 trailer
pub const CRC_LEN: usize = 4;
/// table_id + flags + section_length
pub const SECTION_HEADER_LEN: usize = 3;

/// The three bytes every long-form section starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub private_indicator: bool,
    pub section_length: u16,
}

impl SectionHeader {
    pub fn read(r: &mut BitCursor<'_>, table: &'static str, expected_table_id: u8) -> Result<Self> {
        let table_id = r.read_u8()?;
        if table_id != expected_table_id {
            return Err(ValidationError::TableIdMismatch {
                table,
                expected: expected_table_id,
                actual: table_id,
            });
        }
        let section_syntax_indicator = r.read_flag()?;
        if !section_syntax_indicator {
            return Err(syntax(table, "section_syntax_indicator not set"));
        }
        let private_indicator = r.read_flag()?;
        r.skip_bits(2)?;
        let section_length = r.read_bits(12)? as u16;
        if usize::from(section_length) > MAX_SECTION_LEN {
            return Err(syntax(
                table,
                format!("section_length 0x{section_length:03X} larger than 0x{MAX_SECTION_LEN:03X}"),
            ));
        }
        if usize::from(section_length) > r.bytes_remaining() {
            return Err(ValidationError::OutOfData {
                needed: usize::from(section_length) * 8,
                available: r.bits_remaining(),
            });
        }
        debug!(table, table_id, section_length, "section header");

        Ok(Self {
            table_id,
            section_syntax_indicator,
            private_indicator,
            section_length,
        })
    }

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u8(self.table_id)?;
        w.write_flag(self.section_syntax_indicator)?;
        w.write_flag(self.private_indicator)?;
        w.write_bits(2, 0b11)?;
        w.write_bits(12, u64::from(self.section_length))
    }
}

/// id extension, version and section numbering of long-form sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxHeader {
    /// transport_stream_id in a PAT, program_number in a PMT.
    pub id_extension: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

/// id_extension (2) + version byte (1) + section numbers (2)
pub const SYNTAX_HEADER_LEN: usize = 5;

impl SyntaxHeader {
    /// Multi-section tables are rejected here.
    pub fn read(r: &mut BitCursor<'_>, table: &'static str) -> Result<Self> {
        let id_extension = r.read_u16()?;
        r.skip_bits(2)?;
        let version_number = r.read_bits(5)? as u8;
        let current_next_indicator = r.read_flag()?;
        let section_number = r.read_u8()?;
        let last_section_number = r.read_u8()?;
        if section_number != 0 || last_section_number != 0 {
            return Err(syntax(
                table,
                format!(
                    "multi-section tables not supported (section_number {section_number}, last_section_number {last_section_number})"
                ),
            ));
        }
        debug!(table, id_extension, version_number, current_next_indicator, "section syntax");

        Ok(Self {
            id_extension,
            version_number,
            current_next_indicator,
            section_number,
            last_section_number,
        })
    }

    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u16(self.id_extension)?;
        w.write_bits(2, 0b11)?;
        w.write_bits(5, u64::from(self.version_number))?;
        w.write_flag(self.current_next_indicator)?;
        w.write_u8(self.section_number)?;
        w.write_u8(self.last_section_number)
    }
}

/// Skip the pointer field at the start of a PUSI payload and return the
/// bytes from the first section onward.
pub fn section_start(payload: &[u8]) -> Result<&[u8]> {
    let mut r = BitCursor::new(payload);
    let pointer = usize::from(r.read_u8()?);
    r.skip_bytes(pointer)?;
    r.remaining_slice()
}

/// Check the trailing CRC_32 of `section` (header through CRC inclusive).
pub fn verify_crc(table: &'static str, section: &[u8]) -> Result<()> {
    if section.len() < CRC_LEN {
        return Err(syntax(table, "section shorter than its CRC_32"));
    }
    let (body, trailer) = section.split_at(section.len() - CRC_LEN);
    let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32::crc_finalize(crc32::crc_update(crc32::crc_init(), body));
    if computed != expected {
        return Err(ValidationError::CrcMismatch {
            table,
            expected,
            computed,
        });
    }
    Ok(())
}

/// Frame `body` (everything after section_length, without CRC) into a
/// complete section with a freshly computed CRC_32.
pub fn assemble_section(table_id: u8, private_indicator: bool, body: &[u8]) -> Result<Vec<u8>> {
    let section_length = body.len() + CRC_LEN;
    if section_length > MAX_SECTION_LEN {
        return Err(syntax(
            "section",
            format!("body of {} bytes does not fit one section", body.len()),
        ));
    }
    let header = SectionHeader {
        table_id,
        section_syntax_indicator: true,
        private_indicator,
        section_length: section_length as u16,
    };

    let mut w = BitWriter::new();
    header.write(&mut w)?;
    w.write_bytes(body)?;
    let mut out = w.into_bytes()?;
    let crc = crc32::checksum(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

pub(crate) fn syntax(table: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::SectionSyntax {
        table,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_field_is_honoured() {
        let payload = [0x02, 0xAA, 0xBB, 0x00, 0xB0];
        assert_eq!(section_start(&payload).unwrap(), &[0x00, 0xB0]);
    }

    #[test]
    fn assembled_section_verifies() {
        let section = assemble_section(0x00, false, &[0x00, 0x01, 0xC1, 0x00, 0x00]).unwrap();
        assert_eq!(section[0], 0x00);
        assert_eq!(section[1] & 0x80, 0x80);
        assert_eq!(usize::from(section[2]), section.len() - SECTION_HEADER_LEN);
        verify_crc("PAT", &section).unwrap();
    }

    #[test]
    fn wrong_table_id_is_reported() {
        let data = [0x02, 0xB0, 0x0D];
        let mut r = BitCursor::new(&data);
        let err = SectionHeader::read(&mut r, "PAT", 0x00).unwrap_err();
        assert_eq!(err.code(), 30);
    }

    #[test]
    fn oversized_section_length_is_rejected() {
        let data = [0x00, 0xB3, 0xFF];
        let mut r = BitCursor::new(&data);
        assert!(matches!(
            SectionHeader::read(&mut r, "PAT", 0x00),
            Err(ValidationError::SectionSyntax { .. })
        ));
    }

    #[test]
    fn section_longer_than_buffer_is_rejected() {
        let data = [0x00, 0xB0, 0x0D, 0x00, 0x01];
        let mut r = BitCursor::new(&data);
        assert!(matches!(
            SectionHeader::read(&mut r, "PAT", 0x00),
            Err(ValidationError::OutOfData { .. })
        ));
    }
}
