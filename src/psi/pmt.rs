use tracing::{debug, info};

use crate::bits::{BitCursor, BitWriter};
use crate::constants::*;
use crate::error::{Result, ValidationError};
use crate::psi::descriptor::{Descriptor, descriptors_len, read_descriptors, write_descriptors};
use crate::psi::section::{
    CRC_LEN, SECTION_HEADER_LEN, SYNTAX_HEADER_LEN, SectionHeader, SyntaxHeader, assemble_section,
    syntax, verify_crc,
};

const TABLE: &str = "PMT";

/// ─────────── PMT ───────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtSection {
    pub private_indicator: bool,
    pub program_number: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub pcr_pid: u16,
    pub descriptors: Vec<Descriptor>,
    pub es_info: Vec<ElementaryStreamInfo>,
    pub crc_32: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

fn is_general_purpose(pid: u16) -> bool {
    (GENERAL_PURPOSE_PID_MIN..=GENERAL_PURPOSE_PID_MAX).contains(&pid)
}

/// Decode a PMT starting at its table_id byte.
pub fn parse_pmt(data: &[u8]) -> Result<PmtSection> {
    let mut r = BitCursor::new(data);
    let header = SectionHeader::read(&mut r, TABLE, TABLE_ID_PMT)?;
    let section_length = usize::from(header.section_length);
    if section_length < SYNTAX_HEADER_LEN + 4 + CRC_LEN {
        return Err(syntax(TABLE, format!("section_length {section_length} too short")));
    }
    let section_end = SECTION_HEADER_LEN + section_length;
    let syntax_header = SyntaxHeader::read(&mut r, TABLE)?;

    r.skip_bits(3)?;
    let pcr_pid = r.read_bits(13)? as u16;
    if pcr_pid == NULL_PID {
        return Err(ValidationError::NoProgramPcr {
            program_number: syntax_header.id_extension,
        });
    }
    if !is_general_purpose(pcr_pid) {
        return Err(ValidationError::InvalidPid {
            field: "PCR_PID",
            pid: pcr_pid,
        });
    }
    r.skip_bits(4)?;
    let program_info_length = r.read_bits(12)? as usize;
    if program_info_length > MAX_PROGRAM_INFO_LEN {
        return Err(syntax(
            TABLE,
            format!("program_info_length 0x{program_info_length:03X} larger than 0x{MAX_PROGRAM_INFO_LEN:03X}"),
        ));
    }
    debug!(pcr_pid = format_args!("0x{pcr_pid:04X}"), program_info_length, "PMT header");
    let descriptors = read_descriptors(&mut r, program_info_length)?;

    let mut es_info = Vec::new();
    while section_end.saturating_sub(r.position()) > CRC_LEN {
        let stream_type = r.read_u8()?;
        r.skip_bits(3)?;
        let elementary_pid = r.read_bits(13)? as u16;
        r.skip_bits(4)?;
        let es_info_length = r.read_bits(12)? as usize;
        if es_info_length > MAX_ES_INFO_LEN {
            return Err(syntax(
                TABLE,
                format!("ES_info_length 0x{es_info_length:03X} larger than 0x{MAX_ES_INFO_LEN:03X}"),
            ));
        }
        debug!(
            stream_type = format_args!("0x{stream_type:02X}"),
            description = stream_type_name(stream_type),
            elementary_pid = format_args!("0x{elementary_pid:04X}"),
            es_info_length,
            "PMT ES info"
        );
        es_info.push(ElementaryStreamInfo {
            stream_type,
            elementary_pid,
            descriptors: read_descriptors(&mut r, es_info_length)?,
        });
    }
    if r.position() + CRC_LEN != section_end {
        return Err(syntax(TABLE, "ES info loop overruns section_length"));
    }

    let crc_32 = r.read_u32()?;
    verify_crc(TABLE, &data[..section_end])?;
    info!(
        program_number = syntax_header.id_extension,
        version = syntax_header.version_number,
        streams = es_info.len(),
        "PMT parsed"
    );

    Ok(PmtSection {
        private_indicator: header.private_indicator,
        program_number: syntax_header.id_extension,
        version_number: syntax_header.version_number,
        current_next_indicator: syntax_header.current_next_indicator,
        pcr_pid,
        descriptors,
        es_info,
        crc_32,
    })
}

impl PmtSection {
    pub fn find_es(&self, elementary_pid: u16) -> Option<&ElementaryStreamInfo> {
        self.es_info.iter().find(|es| es.elementary_pid == elementary_pid)
    }

    /// Serialize into a complete section, recomputing lengths and CRC.
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut w = BitWriter::new();
        SyntaxHeader {
            id_extension: self.program_number,
            version_number: self.version_number,
            current_next_indicator: self.current_next_indicator,
            section_number: 0,
            last_section_number: 0,
        }
        .write(&mut w)?;
        w.write_bits(3, 0b111)?;
        w.write_bits(13, u64::from(self.pcr_pid))?;
        w.write_bits(4, 0b1111)?;
        w.write_bits(12, descriptors_len(&self.descriptors) as u64)?;
        write_descriptors(&mut w, &self.descriptors)?;
        for es in &self.es_info {
            w.write_u8(es.stream_type)?;
            w.write_bits(3, 0b111)?;
            w.write_bits(13, u64::from(es.elementary_pid))?;
            w.write_bits(4, 0b1111)?;
            w.write_bits(12, descriptors_len(&es.descriptors) as u64)?;
            write_descriptors(&mut w, &es.descriptors)?;
        }
        assemble_section(TABLE_ID_PMT, self.private_indicator, &w.into_bytes()?)
    }
}

/// Human-readable name of a PMT stream_type.
pub fn stream_type_name(stream_type: u8) -> &'static str {
    match stream_type {
        STREAM_TYPE_MPEG1_VIDEO => "ISO/IEC 11172-2 (MPEG-1 Video)",
        STREAM_TYPE_MPEG2_VIDEO => "ISO/IEC 13818-2 (MPEG-2 Video)",
        STREAM_TYPE_MPEG1_AUDIO => "ISO/IEC 11172-3 (MPEG-1 Audio)",
        STREAM_TYPE_MPEG2_AUDIO => "ISO/IEC 13818-3 (MPEG-2 Audio)",
        STREAM_TYPE_MPEG2_PRIVATE_SECTIONS => "ISO/IEC 13818-1 private_sections",
        STREAM_TYPE_MPEG2_PRIVATE_PES => "ISO/IEC 13818-1 PES packets containing private data",
        STREAM_TYPE_MHEG => "ISO/IEC 13522 MHEG",
        STREAM_TYPE_DSMCC => "ISO/IEC 13818-1 Annex A DSM-CC",
        STREAM_TYPE_H222_1 => "ITU-T Rec. H.222.1",
        STREAM_TYPE_DSMCC_A => "ISO/IEC 13818-6 type A",
        STREAM_TYPE_DSMCC_B => "ISO/IEC 13818-6 type B",
        STREAM_TYPE_DSMCC_C => "ISO/IEC 13818-6 type C",
        STREAM_TYPE_DSMCC_D => "ISO/IEC 13818-6 type D",
        STREAM_TYPE_MPEG2_AUX => "ISO/IEC 13818-1 auxiliary",
        STREAM_TYPE_AAC_ADTS => "ISO/IEC 13818-7 Audio with ADTS transport syntax",
        STREAM_TYPE_MPEG4_VIDEO => "ISO/IEC 14496-2 Visual",
        STREAM_TYPE_AAC_LATM => "ISO/IEC 14496-3 Audio with the LATM transport syntax",
        STREAM_TYPE_MPEG4_SL_PES => "ISO/IEC 14496-1 SL-packetized stream or FlexMux stream in PES packets",
        STREAM_TYPE_MPEG4_SL_SECTIONS => "ISO/IEC 14496-1 SL-packetized stream or FlexMux stream in sections",
        STREAM_TYPE_SDP => "ISO/IEC 13818-6 Synchronized Download Protocol",
        STREAM_TYPE_METADATA_PES => "Metadata carried in PES packets",
        STREAM_TYPE_METADATA_SECTIONS => "Metadata carried in metadata_sections",
        STREAM_TYPE_METADATA_DC => "Metadata carried in ISO/IEC 13818-6 Data Carousel",
        STREAM_TYPE_METADATA_OC => "Metadata carried in ISO/IEC 13818-6 Object Carousel",
        STREAM_TYPE_METADATA_SDP => "Metadata carried in ISO/IEC 13818-6 Synchronized Download Protocol",
        STREAM_TYPE_MPEG2_IPMP => "IPMP stream (ISO/IEC 13818-11, MPEG-2 IPMP)",
        STREAM_TYPE_AVC => "AVC video stream (ITU-T Rec. H.264 | ISO/IEC 14496-10)",
        STREAM_TYPE_AAC_RAW => "ISO/IEC 14496-3 Audio, without additional transport syntax",
        STREAM_TYPE_MPEG4_TEXT => "ISO/IEC 14496-17 Text",
        STREAM_TYPE_AUX_VIDEO => "Auxiliary video stream (ISO/IEC 23002-3)",
        STREAM_TYPE_SVC => "SVC video sub-bitstream (ITU-T Rec. H.264 | ISO/IEC 14496-10 Annex G)",
        STREAM_TYPE_MVC => "MVC video sub-bitstream (ITU-T Rec. H.264 | ISO/IEC 14496-10 Annex H)",
        STREAM_TYPE_JPEG2000 => "Video stream conforming to ITU-T Rec. T.800 | ISO/IEC 15444-1",
        STREAM_TYPE_S3D_MPEG2 => "Additional view for service-compatible stereoscopic 3D (MPEG-2 Video)",
        STREAM_TYPE_S3D_AVC => "Additional view for service-compatible stereoscopic 3D (AVC)",
        STREAM_TYPE_HEVC => "HEVC video stream (ITU-T Rec. H.265 | ISO/IEC 23008-2)",
        STREAM_TYPE_IPMP => "IPMP stream",
        0x25..=0x7E => "ITU-T Rec. H.222.0 | ISO/IEC 13818-1 Reserved",
        0x00 => "ITU-T | ISO/IEC Reserved",
        _ => "User Private",
    }
}
