//! Constants for MPEG-2 TS parsing and DASH segment validation

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// PES packet constants
pub const PES_PACKET_START_CODE_PREFIX: u32 = 0x00_0001;
/// start code (3) + stream_id (1) + PES_packet_length (2)
pub const PES_FIXED_HEADER_LEN: usize = 6;

/// PCR base to 27 MHz
pub const PCR_EXTENSION_MODULUS: u64 = 300; // 27 MHz / 90 kHz

/// Well-known PIDs
pub const PAT_PID: u16 = 0x0000;
pub const CAT_PID: u16 = 0x0001;
pub const TSDT_PID: u16 = 0x0002;
pub const IPMP_CIT_PID: u16 = 0x0003;
pub const NULL_PID: u16 = 0x1FFF;

/// PIDs that may carry PMTs, PCRs and elementary streams
pub const GENERAL_PURPOSE_PID_MIN: u16 = 0x0010;
pub const GENERAL_PURPOSE_PID_MAX: u16 = 0x1FFE;

/// Section limits
pub const MAX_SECTION_LEN: usize = 0x3FD;
pub const MAX_PROGRAM_INFO_LEN: usize = 0x3FF;
pub const MAX_ES_INFO_LEN: usize = 0x3FF;

/// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

/// Stream types (ISO/IEC 13818-1 Table 2-34)
pub const STREAM_TYPE_MPEG1_VIDEO: u8 = 0x01;
pub const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
pub const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
pub const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
pub const STREAM_TYPE_MPEG2_PRIVATE_SECTIONS: u8 = 0x05;
pub const STREAM_TYPE_MPEG2_PRIVATE_PES: u8 = 0x06;
pub const STREAM_TYPE_MHEG: u8 = 0x07;
pub const STREAM_TYPE_DSMCC: u8 = 0x08;
pub const STREAM_TYPE_H222_1: u8 = 0x09;
pub const STREAM_TYPE_DSMCC_A: u8 = 0x0A;
pub const STREAM_TYPE_DSMCC_B: u8 = 0x0B;
pub const STREAM_TYPE_DSMCC_C: u8 = 0x0C;
pub const STREAM_TYPE_DSMCC_D: u8 = 0x0D;
pub const STREAM_TYPE_MPEG2_AUX: u8 = 0x0E;
pub const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;
pub const STREAM_TYPE_MPEG4_VIDEO: u8 = 0x10;
pub const STREAM_TYPE_AAC_LATM: u8 = 0x11;
pub const STREAM_TYPE_MPEG4_SL_PES: u8 = 0x12;
pub const STREAM_TYPE_MPEG4_SL_SECTIONS: u8 = 0x13;
pub const STREAM_TYPE_SDP: u8 = 0x14;
pub const STREAM_TYPE_METADATA_PES: u8 = 0x15;
pub const STREAM_TYPE_METADATA_SECTIONS: u8 = 0x16;
pub const STREAM_TYPE_METADATA_DC: u8 = 0x17;
pub const STREAM_TYPE_METADATA_OC: u8 = 0x18;
pub const STREAM_TYPE_METADATA_SDP: u8 = 0x19;
pub const STREAM_TYPE_MPEG2_IPMP: u8 = 0x1A;
pub const STREAM_TYPE_AVC: u8 = 0x1B;
pub const STREAM_TYPE_AAC_RAW: u8 = 0x1C;
pub const STREAM_TYPE_MPEG4_TEXT: u8 = 0x1D;
pub const STREAM_TYPE_AUX_VIDEO: u8 = 0x1E;
pub const STREAM_TYPE_SVC: u8 = 0x1F;
pub const STREAM_TYPE_MVC: u8 = 0x20;
pub const STREAM_TYPE_JPEG2000: u8 = 0x21;
pub const STREAM_TYPE_S3D_MPEG2: u8 = 0x22;
pub const STREAM_TYPE_S3D_AVC: u8 = 0x23;
pub const STREAM_TYPE_HEVC: u8 = 0x24;
pub const STREAM_TYPE_IPMP: u8 = 0x7F;

/// Descriptor tags
pub const ISO_639_LANGUAGE_DESCRIPTOR: u8 = 0x0A;

/// AVC elementary stream buffer starting capacity
pub const AVC_ES_INIT_BUF_LEN: usize = 65_536;
