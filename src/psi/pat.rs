use tracing::{debug, info, warn};

use crate::bits::{BitCursor, BitWriter};
use crate::constants::TABLE_ID_PAT;
use crate::error::Result;
use crate::psi::section::{
    CRC_LEN, SECTION_HEADER_LEN, SYNTAX_HEADER_LEN, SectionHeader, SyntaxHeader, assemble_section,
    syntax, verify_crc,
};

const TABLE: &str = "PAT";

/// ─────────── PAT ───────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatSection {
    pub private_indicator: bool,
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub programs: Vec<PatEntry>,
    pub crc_32: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    /// 0 means the PID carries the NIT.
    pub program_number: u16,
    pub pid: u16,
}

/// Decode a PAT starting at its table_id byte.
pub fn parse_pat(data: &[u8]) -> Result<PatSection> {
    let mut r = BitCursor::new(data);
    let header = SectionHeader::read(&mut r, TABLE, TABLE_ID_PAT)?;
    let section_length = usize::from(header.section_length);
    if section_length < SYNTAX_HEADER_LEN + CRC_LEN {
        return Err(syntax(TABLE, format!("section_length {section_length} too short")));
    }
    let syntax_header = SyntaxHeader::read(&mut r, TABLE)?;

    let num_programs = (section_length - SYNTAX_HEADER_LEN - CRC_LEN) / 4;
    let mut programs = Vec::with_capacity(num_programs);
    for _ in 0..num_programs {
        let program_number = r.read_u16()?;
        r.skip_bits(3)?;
        let pid = r.read_bits(13)? as u16;
        debug!(program_number, pid = format_args!("0x{pid:04X}"), "PAT entry");
        programs.push(PatEntry {
            program_number,
            pid,
        });
    }
    if num_programs > 1 {
        warn!(num_programs, "PAT lists more than one program");
    }

    let crc_32 = r.read_u32()?;
    verify_crc(TABLE, &data[..SECTION_HEADER_LEN + section_length])?;
    info!(
        transport_stream_id = syntax_header.id_extension,
        version = syntax_header.version_number,
        num_programs,
        "PAT parsed"
    );

    Ok(PatSection {
        private_indicator: header.private_indicator,
        transport_stream_id: syntax_header.id_extension,
        version_number: syntax_header.version_number,
        current_next_indicator: syntax_header.current_next_indicator,
        programs,
        crc_32,
    })
}

impl PatSection {
    /// Serialize into a complete section, recomputing length and CRC.
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut w = BitWriter::new();
        SyntaxHeader {
            id_extension: self.transport_stream_id,
            version_number: self.version_number,
            current_next_indicator: self.current_next_indicator,
            section_number: 0,
            last_section_number: 0,
        }
        .write(&mut w)?;
        for entry in &self.programs {
            w.write_u16(entry.program_number)?;
            w.write_bits(3, 0b111)?;
            w.write_bits(13, u64::from(entry.pid))?;
        }
        assemble_section(TABLE_ID_PAT, self.private_indicator, &w.into_bytes()?)
    }
}
