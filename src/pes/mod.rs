//! PES packet header codec.

pub mod assembler;

pub use assembler::{AssemblyState, CompletedPes, PesAssembler};

use tracing::debug;

use crate::bits::{BitCursor, BitWriter};
use crate::constants::{PES_FIXED_HEADER_LEN, PES_PACKET_START_CODE_PREFIX};
use crate::error::{Result, ValidationError};

pub const STREAM_ID_PROGRAM_STREAM_MAP: u8 = 0xBC;
pub const STREAM_ID_PADDING: u8 = 0xBE;
pub const STREAM_ID_PRIVATE_STREAM_2: u8 = 0xBF;
pub const STREAM_ID_ECM: u8 = 0xF0;
pub const STREAM_ID_EMM: u8 = 0xF1;
pub const STREAM_ID_DSMCC: u8 = 0xF2;
pub const STREAM_ID_H222_1_TYPE_E: u8 = 0xF8;
pub const STREAM_ID_PROGRAM_STREAM_DIRECTORY: u8 = 0xFF;

const PTS_ONLY: u8 = 0b10;
const PTS_AND_DTS: u8 = 0b11;

/// Whether packets of this stream_id carry the optional PES header
/// (flags, PTS/DTS, ...) after PES_packet_length.
pub fn has_pes_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        STREAM_ID_PROGRAM_STREAM_MAP
            | STREAM_ID_PADDING
            | STREAM_ID_PRIVATE_STREAM_2
            | STREAM_ID_ECM
            | STREAM_ID_EMM
            | STREAM_ID_PROGRAM_STREAM_DIRECTORY
            | STREAM_ID_DSMCC
            | STREAM_ID_H222_1_TYPE_E
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escr {
    pub base: u64,
    pub extension: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    pub counter: u8,
    pub mpeg1_mpeg2_identifier: bool,
    pub original_stuff_length: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PStdBuffer {
    pub scale: bool,
    pub size: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesExtension {
    pub private_data: Option<[u8; 16]>,
    pub pack_header: Option<Vec<u8>>,
    pub sequence_counter: Option<SequenceCounter>,
    pub p_std_buffer: Option<PStdBuffer>,
    /// PES_extension_field bytes following PES_extension_field_length.
    pub extension_2: Option<Vec<u8>>,
}

impl PesExtension {
    fn len(&self) -> usize {
        1 + self.private_data.map_or(0, |_| 16)
            + self.pack_header.as_ref().map_or(0, |p| 1 + p.len())
            + self.sequence_counter.map_or(0, |_| 2)
            + self.p_std_buffer.map_or(0, |_| 2)
            + self.extension_2.as_ref().map_or(0, |e| 1 + e.len())
    }

    fn read(r: &mut BitCursor<'_>) -> Result<Self> {
        let private_data_flag = r.read_flag()?;
        let pack_header_field_flag = r.read_flag()?;
        let sequence_counter_flag = r.read_flag()?;
        let p_std_buffer_flag = r.read_flag()?;
        r.skip_bits(3)?;
        let extension_flag_2 = r.read_flag()?;

        let mut ext = Self::default();
        if private_data_flag {
            let mut data = [0u8; 16];
            data.copy_from_slice(r.read_bytes(16)?);
            ext.private_data = Some(data);
        }
        if pack_header_field_flag {
            let len = usize::from(r.read_u8()?);
            ext.pack_header = Some(r.read_bytes(len)?.to_vec());
        }
        if sequence_counter_flag {
            r.skip_bits(1)?;
            let counter = r.read_bits(7)? as u8;
            r.skip_bits(1)?;
            ext.sequence_counter = Some(SequenceCounter {
                counter,
                mpeg1_mpeg2_identifier: r.read_flag()?,
                original_stuff_length: r.read_bits(6)? as u8,
            });
        }
        if p_std_buffer_flag {
            r.skip_bits(2)?;
            ext.p_std_buffer = Some(PStdBuffer {
                scale: r.read_flag()?,
                size: r.read_bits(13)? as u16,
            });
        }
        if extension_flag_2 {
            r.skip_bits(1)?;
            let len = r.read_bits(7)? as usize;
            ext.extension_2 = Some(r.read_bytes(len)?.to_vec());
        }
        Ok(ext)
    }

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_flag(self.private_data.is_some())?;
        w.write_flag(self.pack_header.is_some())?;
        w.write_flag(self.sequence_counter.is_some())?;
        w.write_flag(self.p_std_buffer.is_some())?;
        w.write_bits(3, 0b111)?;
        w.write_flag(self.extension_2.is_some())?;
        if let Some(data) = &self.private_data {
            w.write_bytes(data)?;
        }
        if let Some(pack) = &self.pack_header {
            w.write_u8(pack.len() as u8)?;
            w.write_bytes(pack)?;
        }
        if let Some(seq) = self.sequence_counter {
            w.write_flag(true)?;
            w.write_bits(7, u64::from(seq.counter))?;
            w.write_flag(true)?;
            w.write_flag(seq.mpeg1_mpeg2_identifier)?;
            w.write_bits(6, u64::from(seq.original_stuff_length))?;
        }
        if let Some(buffer) = self.p_std_buffer {
            w.write_bits(2, 0b01)?;
            w.write_flag(buffer.scale)?;
            w.write_bits(13, u64::from(buffer.size))?;
        }
        if let Some(data) = &self.extension_2 {
            w.write_flag(true)?;
            w.write_bits(7, data.len() as u64)?;
            w.write_bytes(data)?;
        }
        Ok(())
    }
}

/// Fields between PES_packet_length and the payload, present for most
/// stream ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesOptionalHeader {
    pub scrambling_control: u8,
    pub priority: bool,
    pub data_alignment_indicator: bool,
    pub copyright: bool,
    pub original_or_copy: bool,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub escr: Option<Escr>,
    pub es_rate: Option<u32>,
    pub trick_mode: Option<u8>,
    pub additional_copy_info: Option<u8>,
    pub previous_pes_packet_crc: Option<u16>,
    pub extension: Option<PesExtension>,
    /// As read; includes stuffing bytes.
    pub header_data_length: u8,
}

impl PesOptionalHeader {
    /// Bytes needed after PES_header_data_length for the present fields.
    pub fn min_data_length(&self) -> usize {
        self.pts.map_or(0, |_| 5)
            + self.dts.map_or(0, |_| 5)
            + self.escr.map_or(0, |_| 6)
            + self.es_rate.map_or(0, |_| 3)
            + self.trick_mode.map_or(0, |_| 1)
            + self.additional_copy_info.map_or(0, |_| 1)
            + self.previous_pes_packet_crc.map_or(0, |_| 2)
            + self.extension.as_ref().map_or(0, PesExtension::len)
    }

    fn read(r: &mut BitCursor<'_>) -> Result<Self> {
        let marker = r.read_bits(2)?;
        if marker != 0b10 {
            return Err(ValidationError::PesHeaderMalformed(format!(
                "expected '10' before PES_scrambling_control, found {marker:02b}"
            )));
        }
        let mut header = PesOptionalHeader {
            scrambling_control: r.read_bits(2)? as u8,
            priority: r.read_flag()?,
            data_alignment_indicator: r.read_flag()?,
            copyright: r.read_flag()?,
            original_or_copy: r.read_flag()?,
            ..Default::default()
        };
        let pts_dts_flags = r.read_bits(2)? as u8;
        let escr_flag = r.read_flag()?;
        let es_rate_flag = r.read_flag()?;
        let dsm_trick_mode_flag = r.read_flag()?;
        let additional_copy_info_flag = r.read_flag()?;
        let crc_flag = r.read_flag()?;
        let extension_flag = r.read_flag()?;
        header.header_data_length = r.read_u8()?;

        if pts_dts_flags == 0b01 {
            return Err(ValidationError::PesHeaderMalformed(
                "PTS_DTS_flags value '01' is forbidden".into(),
            ));
        }
        let mut hr = BitCursor::new(r.read_bytes(usize::from(header.header_data_length))?);
        if pts_dts_flags & PTS_ONLY != 0 {
            hr.skip_bits(4)?;
            header.pts = Some(hr.read_timestamp()?);
        }
        if pts_dts_flags == PTS_AND_DTS {
            hr.skip_bits(4)?;
            header.dts = Some(hr.read_timestamp()?);
        }
        if escr_flag {
            hr.skip_bits(2)?;
            let base = hr.read_timestamp()?;
            let extension = hr.read_bits(9)? as u16;
            hr.skip_bits(1)?;
            header.escr = Some(Escr { base, extension });
        }
        if es_rate_flag {
            hr.skip_bits(1)?;
            header.es_rate = Some(hr.read_bits(22)? as u32);
            hr.skip_bits(1)?;
        }
        if dsm_trick_mode_flag {
            header.trick_mode = Some(hr.read_u8()?);
        }
        if additional_copy_info_flag {
            hr.skip_bits(1)?;
            header.additional_copy_info = Some(hr.read_bits(7)? as u8);
        }
        if crc_flag {
            header.previous_pes_packet_crc = Some(hr.read_u16()?);
        }
        if extension_flag {
            header.extension = Some(PesExtension::read(&mut hr)?);
        }
        Ok(header)
    }

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        let min = self.min_data_length();
        let data_length = usize::from(self.header_data_length).max(min);

        w.write_bits(2, 0b10)?;
        w.write_bits(2, u64::from(self.scrambling_control))?;
        w.write_flag(self.priority)?;
        w.write_flag(self.data_alignment_indicator)?;
        w.write_flag(self.copyright)?;
        w.write_flag(self.original_or_copy)?;
        let pts_dts_flags = match (self.pts, self.dts) {
            (Some(_), Some(_)) => PTS_AND_DTS,
            (Some(_), None) => PTS_ONLY,
            _ => 0,
        };
        w.write_bits(2, u64::from(pts_dts_flags))?;
        w.write_flag(self.escr.is_some())?;
        w.write_flag(self.es_rate.is_some())?;
        w.write_flag(self.trick_mode.is_some())?;
        w.write_flag(self.additional_copy_info.is_some())?;
        w.write_flag(self.previous_pes_packet_crc.is_some())?;
        w.write_flag(self.extension.is_some())?;
        w.write_u8(data_length as u8)?;

        if let Some(pts) = self.pts {
            w.write_timestamp(pts_dts_flags, pts)?;
        }
        if let (Some(_), Some(dts)) = (self.pts, self.dts) {
            w.write_timestamp(0b0001, dts)?;
        }
        if let Some(escr) = self.escr {
            w.write_bits(2, 0b11)?;
            w.write_marked_timestamp(escr.base)?;
            w.write_bits(9, u64::from(escr.extension))?;
            w.write_flag(true)?;
        }
        if let Some(rate) = self.es_rate {
            w.write_flag(true)?;
            w.write_bits(22, u64::from(rate))?;
            w.write_flag(true)?;
        }
        if let Some(trick) = self.trick_mode {
            w.write_u8(trick)?;
        }
        if let Some(info) = self.additional_copy_info {
            w.write_flag(true)?;
            w.write_bits(7, u64::from(info))?;
        }
        if let Some(crc) = self.previous_pes_packet_crc {
            w.write_u16(crc)?;
        }
        if let Some(ext) = &self.extension {
            ext.write(w)?;
        }
        w.write_stuffing(0xFF, data_length - min)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// 0 means unbounded (video only).
    pub pes_packet_length: u16,
    pub optional: Option<PesOptionalHeader>,
}

impl PesHeader {
    /// Bytes from the start code through the end of the header.
    pub fn header_len(&self) -> usize {
        match &self.optional {
            Some(opt) => {
                PES_FIXED_HEADER_LEN
                    + 3
                    + usize::from(opt.header_data_length).max(opt.min_data_length())
            }
            None => PES_FIXED_HEADER_LEN,
        }
    }

    pub fn pts(&self) -> Option<u64> {
        self.optional.as_ref().and_then(|o| o.pts)
    }

    pub fn dts(&self) -> Option<u64> {
        self.optional.as_ref().and_then(|o| o.dts)
    }

    pub fn scrambling_control(&self) -> u8 {
        self.optional.as_ref().map_or(0, |o| o.scrambling_control)
    }

    pub fn is_unbounded(&self) -> bool {
        self.pes_packet_length == 0
    }

    /// Payload bytes following the header, per PES_packet_length.
    pub fn declared_payload_len(&self) -> Result<usize> {
        let after_length = self.header_len() - PES_FIXED_HEADER_LEN;
        usize::from(self.pes_packet_length)
            .checked_sub(after_length)
            .ok_or_else(|| {
                ValidationError::PesHeaderMalformed(format!(
                    "PES_packet_length {} shorter than the {after_length} header bytes following it",
                    self.pes_packet_length
                ))
            })
    }

    fn read(r: &mut BitCursor<'_>) -> Result<Self> {
        let prefix = r.read_u24()?;
        if prefix != PES_PACKET_START_CODE_PREFIX {
            return Err(ValidationError::PesHeaderMalformed(format!(
                "packet_start_code_prefix 0x{prefix:06X}"
            )));
        }
        let stream_id = r.read_u8()?;
        let pes_packet_length = r.read_u16()?;
        let optional = if has_pes_header(stream_id) {
            Some(PesOptionalHeader::read(r)?)
        } else {
            None
        };
        Ok(Self {
            stream_id,
            pes_packet_length,
            optional,
        })
    }

    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_bits(24, u64::from(PES_PACKET_START_CODE_PREFIX))?;
        w.write_u8(self.stream_id)?;
        w.write_u16(self.pes_packet_length)?;
        if let Some(opt) = &self.optional {
            opt.write(w)?;
        }
        Ok(())
    }

    /// Drop redundant fields and fit PES_packet_length to `payload_len`,
    /// falling back to unbounded when it does not fit 16 bits.
    pub fn trim(&mut self, payload_len: usize) {
        if let Some(opt) = &mut self.optional {
            if opt.dts.is_some() && opt.dts == opt.pts {
                opt.dts = None;
            }
            opt.header_data_length = opt.min_data_length() as u8;
        }
        let total = self.header_len() - PES_FIXED_HEADER_LEN + payload_len;
        self.pes_packet_length = u16::try_from(total).unwrap_or(0);
    }
}

/// A PES packet start as found at the beginning of a PUSI payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesPacket<'a> {
    pub header: PesHeader,
    /// Everything after the header that is in this buffer.
    pub payload: &'a [u8],
}

impl<'a> PesPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut r = BitCursor::new(data);
        let header = PesHeader::read(&mut r).map_err(|e| match e {
            ValidationError::OutOfData { .. } => {
                ValidationError::PesHeaderMalformed(format!("header truncated ({e})"))
            }
            other => other,
        })?;
        let payload = r.remaining_slice()?;
        debug!(
            stream_id = format_args!("0x{:02X}", header.stream_id),
            pes_packet_length = header.pes_packet_length,
            pts = ?header.pts(),
            dts = ?header.dts(),
            header_len = header.header_len(),
            "PES header"
        );
        Ok(Self { header, payload })
    }
}

/// Serialize a header followed by its payload.
pub fn write_pes_packet(header: &PesHeader, payload: &[u8]) -> Result<Vec<u8>> {
    let mut w = BitWriter::new();
    header.write(&mut w)?;
    w.write_bytes(payload)?;
    w.into_bytes()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn video_header(pts: u64, dts: Option<u64>) -> PesHeader {
        PesHeader {
            stream_id: 0xE0,
            pes_packet_length: 0,
            optional: Some(PesOptionalHeader {
                data_alignment_indicator: true,
                pts: Some(pts),
                dts,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn parses_pts_and_dts() {
        let mut header = video_header(183_003, Some(180_000));
        header.trim(4);
        let bytes = write_pes_packet(&header, &[0, 0, 0, 1]).unwrap();
        assert_eq!(&bytes[..4], &[0x00, 0x00, 0x01, 0xE0]);

        let pes = PesPacket::parse(&bytes).unwrap();
        assert_eq!(pes.header.pts(), Some(183_003));
        assert_eq!(pes.header.dts(), Some(180_000));
        assert_eq!(pes.header.header_len(), 19);
        assert_eq!(pes.header.pes_packet_length, 13 + 4);
        assert_eq!(pes.header.declared_payload_len().unwrap(), 4);
        assert_eq!(pes.payload, &[0, 0, 0, 1]);
    }

    #[test]
    fn trim_drops_dts_equal_to_pts() {
        let mut header = video_header(90_000, Some(90_000));
        header.trim(100);
        assert_eq!(header.dts(), None);
        assert_eq!(header.header_len(), 14);
        assert_eq!(header.pes_packet_length, 8 + 100);
    }

    #[test]
    fn trim_falls_back_to_unbounded() {
        let mut header = video_header(0, None);
        header.trim(70_000);
        assert!(header.is_unbounded());
    }

    #[test]
    fn optional_fields_survive_a_round_trip() {
        let header = PesHeader {
            stream_id: 0xC0,
            pes_packet_length: 0,
            optional: Some(PesOptionalHeader {
                priority: true,
                copyright: true,
                pts: Some(1),
                escr: Some(Escr {
                    base: 123_456,
                    extension: 7,
                }),
                es_rate: Some(1000),
                trick_mode: Some(0x5A),
                additional_copy_info: Some(0x33),
                previous_pes_packet_crc: Some(0xBEEF),
                extension: Some(PesExtension {
                    sequence_counter: Some(SequenceCounter {
                        counter: 9,
                        mpeg1_mpeg2_identifier: true,
                        original_stuff_length: 2,
                    }),
                    p_std_buffer: Some(PStdBuffer {
                        scale: true,
                        size: 100,
                    }),
                    extension_2: Some(vec![0x80, 0x01]),
                    ..Default::default()
                }),
                header_data_length: 40,
                ..Default::default()
            }),
        };
        let bytes = write_pes_packet(&header, &[0xAA]).unwrap();
        let pes = PesPacket::parse(&bytes).unwrap();
        assert_eq!(pes.header, header);
        assert_eq!(pes.payload, &[0xAA]);
    }

    #[test]
    fn padding_stream_has_no_optional_header() {
        let bytes = [0x00, 0x00, 0x01, 0xBE, 0x00, 0x02, 0xFF, 0xFF];
        let pes = PesPacket::parse(&bytes).unwrap();
        assert!(pes.header.optional.is_none());
        assert_eq!(pes.header.header_len(), 6);
        assert_eq!(pes.payload.len(), 2);
        assert!(!has_pes_header(0xBE));
        assert!(has_pes_header(0xE0));
    }

    #[test]
    fn bad_start_code_is_malformed() {
        let bytes = [0x00, 0x00, 0x02, 0xE0, 0x00, 0x00, 0x80, 0x00, 0x00];
        assert!(matches!(
            PesPacket::parse(&bytes),
            Err(ValidationError::PesHeaderMalformed(_))
        ));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let bytes = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x80, 0x05, 0x21];
        assert!(matches!(
            PesPacket::parse(&bytes),
            Err(ValidationError::PesHeaderMalformed(_))
        ));
    }
}
