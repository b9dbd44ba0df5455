//! Transport packet header and adaptation field codec.

use tracing::debug;

use crate::bits::{BitCursor, BitWriter};
use crate::constants::{PCR_EXTENSION_MODULUS, TS_HEADER_SIZE, TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::error::{Result, ValidationError};

const TS_BODY_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TsHeader {
    pub transport_error_indicator: bool,
    pub payload_unit_start_indicator: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub transport_scrambling_control: u8,
    /// 01 payload only, 10 adaptation field only, 11 both.
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
}

impl TsHeader {
    pub fn read(r: &mut BitCursor<'_>) -> Result<Self> {
        let sync_byte = r.read_u8()?;
        if sync_byte != TS_SYNC_BYTE {
            return Err(ValidationError::InvalidSyncByte(sync_byte));
        }
        let transport_error_indicator = r.read_flag()?;
        let payload_unit_start_indicator = r.read_flag()?;
        let transport_priority = r.read_flag()?;
        let pid = r.read_bits(13)? as u16;
        if transport_error_indicator {
            return Err(ValidationError::TransportErrorIndicator { pid });
        }
        let header = Self {
            transport_error_indicator,
            payload_unit_start_indicator,
            transport_priority,
            pid,
            transport_scrambling_control: r.read_bits(2)? as u8,
            adaptation_field_control: r.read_bits(2)? as u8,
            continuity_counter: r.read_bits(4)? as u8,
        };
        debug!(
            pid = format_args!("0x{:04X}", header.pid),
            pusi = header.payload_unit_start_indicator,
            priority = header.transport_priority,
            scrambling = header.transport_scrambling_control,
            afc = header.adaptation_field_control,
            cc = header.continuity_counter,
            "TS header"
        );
        Ok(header)
    }

    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u8(TS_SYNC_BYTE)?;
        w.write_flag(self.transport_error_indicator)?;
        w.write_flag(self.payload_unit_start_indicator)?;
        w.write_flag(self.transport_priority)?;
        w.write_bits(13, u64::from(self.pid))?;
        w.write_bits(2, u64::from(self.transport_scrambling_control))?;
        w.write_bits(2, u64::from(self.adaptation_field_control))?;
        w.write_bits(4, u64::from(self.continuity_counter))
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0b10 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0b01 != 0
    }
}

/// Program Clock Reference: 33-bit base @ 90 kHz + 9-bit extension @ 27 MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcr {
    pub base: u64,
    pub extension: u16,
}

impl Pcr {
    fn read(r: &mut BitCursor<'_>) -> Result<Self> {
        let base = r.read_bits(33)?;
        r.skip_bits(6)?;
        let extension = r.read_bits(9)? as u16;
        Ok(Self { base, extension })
    }

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_bits(33, self.base)?;
        w.write_bits(6, 0b11_1111)?;
        w.write_bits(9, u64::from(self.extension))
    }

    /// Full PCR value at 27 MHz resolution.
    pub fn as_27mhz(&self) -> u64 {
        self.base * PCR_EXTENSION_MODULUS + u64::from(self.extension)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegalTimeWindow {
    pub valid: bool,
    pub offset: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeamlessSplice {
    pub splice_type: u8,
    pub dts_next_au: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptationFieldExtension {
    pub ltw: Option<LegalTimeWindow>,
    pub piecewise_rate: Option<u32>,
    pub seamless_splice: Option<SeamlessSplice>,
}

impl AdaptationFieldExtension {
    /// Value of adaptation_field_extension_length for the present fields.
    pub fn min_length(&self) -> usize {
        1 + self.ltw.map_or(0, |_| 2)
            + self.piecewise_rate.map_or(0, |_| 3)
            + self.seamless_splice.map_or(0, |_| 5)
    }

    fn read(r: &mut BitCursor<'_>) -> Result<Self> {
        let length = usize::from(r.read_u8()?);
        let mut er = BitCursor::new(r.read_bytes(length)?);
        let mut ext = Self::default();
        if length == 0 {
            return Ok(ext);
        }
        let ltw_flag = er.read_flag()?;
        let piecewise_rate_flag = er.read_flag()?;
        let seamless_splice_flag = er.read_flag()?;
        er.skip_bits(5)?;
        if ltw_flag {
            ext.ltw = Some(LegalTimeWindow {
                valid: er.read_flag()?,
                offset: er.read_bits(15)? as u16,
            });
        }
        if piecewise_rate_flag {
            er.skip_bits(2)?;
            ext.piecewise_rate = Some(er.read_bits(22)? as u32);
        }
        if seamless_splice_flag {
            let splice_type = er.read_bits(4)? as u8;
            ext.seamless_splice = Some(SeamlessSplice {
                splice_type,
                dts_next_au: er.read_timestamp()?,
            });
        }
        debug!(
            length,
            ltw = ?ext.ltw,
            piecewise_rate = ?ext.piecewise_rate,
            seamless_splice = ?ext.seamless_splice,
            "adaptation field extension"
        );
        Ok(ext)
    }

    fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u8(self.min_length() as u8)?;
        w.write_flag(self.ltw.is_some())?;
        w.write_flag(self.piecewise_rate.is_some())?;
        w.write_flag(self.seamless_splice.is_some())?;
        w.write_bits(5, 0b1_1111)?;
        if let Some(ltw) = self.ltw {
            w.write_flag(ltw.valid)?;
            w.write_bits(15, u64::from(ltw.offset))?;
        }
        if let Some(rate) = self.piecewise_rate {
            w.write_bits(2, 0b11)?;
            w.write_bits(22, u64::from(rate))?;
        }
        if let Some(splice) = self.seamless_splice {
            w.write_timestamp(splice.splice_type, splice.dts_next_au)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptationField {
    /// As read from the stream; the writer recomputes it.
    pub adaptation_field_length: u8,
    pub discontinuity_indicator: bool,
    pub random_access_indicator: bool,
    pub elementary_stream_priority_indicator: bool,
    pub pcr: Option<Pcr>,
    pub opcr: Option<Pcr>,
    pub splice_countdown: Option<i8>,
    pub transport_private_data: Option<Vec<u8>>,
    pub extension: Option<AdaptationFieldExtension>,
}

impl AdaptationField {
    /// Read the length byte and exactly that many bytes, stuffing included.
    /// `available` is the number of bytes left in the packet.
    pub fn read(r: &mut BitCursor<'_>, available: usize) -> Result<Self> {
        let length = usize::from(r.read_u8()?);
        if length + 1 > available {
            return Err(ValidationError::AdaptationFieldOverflow {
                length,
                available: available.saturating_sub(1),
            });
        }
        let mut ar = BitCursor::new(r.read_bytes(length)?);
        let mut af = AdaptationField {
            adaptation_field_length: length as u8,
            ..Default::default()
        };
        if length == 0 {
            return Ok(af);
        }

        af.discontinuity_indicator = ar.read_flag()?;
        af.random_access_indicator = ar.read_flag()?;
        af.elementary_stream_priority_indicator = ar.read_flag()?;
        let pcr_flag = ar.read_flag()?;
        let opcr_flag = ar.read_flag()?;
        let splicing_point_flag = ar.read_flag()?;
        let transport_private_data_flag = ar.read_flag()?;
        let adaptation_field_extension_flag = ar.read_flag()?;

        if pcr_flag {
            af.pcr = Some(Pcr::read(&mut ar)?);
        }
        if opcr_flag {
            af.opcr = Some(Pcr::read(&mut ar)?);
        }
        if splicing_point_flag {
            af.splice_countdown = Some(ar.read_u8()? as i8);
        }
        if transport_private_data_flag {
            let len = usize::from(ar.read_u8()?);
            af.transport_private_data = Some(ar.read_bytes(len)?.to_vec());
        }
        if adaptation_field_extension_flag {
            af.extension = Some(AdaptationFieldExtension::read(&mut ar)?);
        }

        debug!(
            length,
            discontinuity = af.discontinuity_indicator,
            random_access = af.random_access_indicator,
            es_priority = af.elementary_stream_priority_indicator,
            pcr = ?af.pcr.map(|p| p.as_27mhz()),
            opcr = ?af.opcr.map(|p| p.as_27mhz()),
            splice_countdown = ?af.splice_countdown,
            private_data_len = ?af.transport_private_data.as_ref().map(Vec::len),
            stuffing = ar.bytes_remaining(),
            "adaptation field"
        );
        Ok(af)
    }

    /// Smallest adaptation_field_length that holds the present fields.
    pub fn min_length(&self) -> usize {
        let optional = self.pcr.map_or(0, |_| 6)
            + self.opcr.map_or(0, |_| 6)
            + self.splice_countdown.map_or(0, |_| 1)
            + self.transport_private_data.as_ref().map_or(0, |d| 1 + d.len())
            + self.extension.as_ref().map_or(0, |e| 1 + e.min_length());
        let any_indicator = self.discontinuity_indicator
            || self.random_access_indicator
            || self.elementary_stream_priority_indicator;
        if optional == 0 && !any_indicator {
            0
        } else {
            1 + optional
        }
    }

    /// Write the field padded with 0xFF so that adaptation_field_length is
    /// at least `target_length`.
    pub fn write(&self, w: &mut BitWriter, target_length: usize) -> Result<()> {
        let min = self.min_length();
        let length = target_length.max(min);
        w.write_u8(length as u8)?;
        if length == 0 {
            return Ok(());
        }

        w.write_flag(self.discontinuity_indicator)?;
        w.write_flag(self.random_access_indicator)?;
        w.write_flag(self.elementary_stream_priority_indicator)?;
        w.write_flag(self.pcr.is_some())?;
        w.write_flag(self.opcr.is_some())?;
        w.write_flag(self.splice_countdown.is_some())?;
        w.write_flag(self.transport_private_data.is_some())?;
        w.write_flag(self.extension.is_some())?;
        if let Some(pcr) = &self.pcr {
            pcr.write(w)?;
        }
        if let Some(opcr) = &self.opcr {
            opcr.write(w)?;
        }
        if let Some(countdown) = self.splice_countdown {
            w.write_u8(countdown as u8)?;
        }
        if let Some(data) = &self.transport_private_data {
            w.write_u8(data.len() as u8)?;
            w.write_bytes(data)?;
        }
        if let Some(ext) = &self.extension {
            ext.write(w)?;
        }
        w.write_stuffing(0xFF, length - min.max(1))
    }
}

/// One decoded 188-byte packet; the payload borrows from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPacket<'a> {
    pub header: TsHeader,
    pub adaptation_field: Option<AdaptationField>,
    pub payload: Option<&'a [u8]>,
}

impl<'a> TsPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < TS_PACKET_SIZE {
            return Err(ValidationError::TruncatedPacket {
                expected: TS_PACKET_SIZE,
                actual: data.len(),
            });
        }
        let mut r = BitCursor::new(&data[..TS_PACKET_SIZE]);
        let header = TsHeader::read(&mut r)?;
        let adaptation_field = if header.has_adaptation_field() {
            let available = r.bytes_remaining();
            Some(AdaptationField::read(&mut r, available)?)
        } else {
            None
        };
        let payload = if header.has_payload() {
            Some(r.remaining_slice()?)
        } else {
            None
        };

        Ok(Self {
            header,
            adaptation_field,
            payload,
        })
    }

    pub fn pid(&self) -> u16 {
        self.header.pid
    }

    pub fn pcr(&self) -> Option<Pcr> {
        self.adaptation_field.as_ref().and_then(|af| af.pcr)
    }

    /// Serialize to exactly 188 bytes. The adaptation field is created or
    /// grown with stuffing so the payload ends at the packet boundary, and
    /// adaptation_field_control is derived from what is present.
    pub fn write(&self) -> Result<Vec<u8>> {
        let payload = self.payload.unwrap_or(&[]);
        if payload.len() > TS_BODY_SIZE {
            return Err(ValidationError::OutOfData {
                needed: payload.len() * 8,
                available: TS_BODY_SIZE * 8,
            });
        }
        let room = TS_BODY_SIZE - payload.len();
        let adaptation_field = match (&self.adaptation_field, room) {
            (None, 0) => None,
            (None, _) => Some(AdaptationField::default()),
            (Some(af), _) => Some(af.clone()),
        };

        let mut header = self.header;
        header.transport_error_indicator = false;
        header.adaptation_field_control =
            (u8::from(adaptation_field.is_some()) << 1) | u8::from(self.payload.is_some());

        let mut w = BitWriter::new();
        header.write(&mut w)?;
        if let Some(af) = &adaptation_field {
            if 1 + af.min_length() > room {
                return Err(ValidationError::AdaptationFieldOverflow {
                    length: af.min_length(),
                    available: room.saturating_sub(1),
                });
            }
            af.write(&mut w, room - 1)?;
        }
        w.write_bytes(payload)?;
        w.into_bytes()
    }
}
