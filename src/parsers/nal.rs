//! H.264 NAL unit location and header decoding.

use memchr::memmem;
use tracing::debug;

use super::utils::{hex_preview, remove_emulation_prevention};
use crate::bits::BitCursor;
use crate::error::{Result, ValidationError};

pub const NAL_UNIT_TYPE_CODED_SLICE_NON_IDR: u8 = 1;
pub const NAL_UNIT_TYPE_CODED_SLICE_IDR: u8 = 5;
pub const NAL_UNIT_TYPE_SEI: u8 = 6;
pub const NAL_UNIT_TYPE_SPS: u8 = 7;
pub const NAL_UNIT_TYPE_PPS: u8 = 8;
pub const NAL_UNIT_TYPE_AUD: u8 = 9;
pub const NAL_UNIT_TYPE_CODED_SLICE_AUX: u8 = 19;

const START_CODE: &[u8] = &[0x00, 0x00, 0x01];

/// Iterator over the start-code delimited NAL units of a buffer. Each
/// item starts at the NAL header byte; trailing zero bytes (including the
/// leading zero of a following 4-byte start code) are trimmed.
pub struct NalUnits<'a> {
    rest: &'a [u8],
    finder: memmem::Finder<'static>,
}

pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits {
        rest: data,
        finder: memmem::Finder::new(START_CODE),
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let start = self.finder.find(self.rest)? + START_CODE.len();
        let next = self
            .finder
            .find(&self.rest[start..])
            .map_or(self.rest.len(), |off| start + off);
        let mut end = next;
        while end > start && self.rest[end - 1] == 0 {
            end -= 1;
        }
        let nal = &self.rest[start..end];
        self.rest = &self.rest[next..];
        Some(nal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: u32,
    pub pic_parameter_set_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalPayload {
    AccessUnitDelimiter { primary_pic_type: u8 },
    Slice(SliceHeader),
    /// Not decoded beyond the NAL header.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    pub nal_ref_idc: u8,
    pub nal_unit_type: u8,
    pub payload: NalPayload,
}

impl NalUnit {
    /// Decode a NAL unit starting at its header byte.
    pub fn parse(nal: &[u8]) -> Result<Self> {
        let Some((&header, body)) = nal.split_first() else {
            return Err(ValidationError::InvalidNalUnit("empty NAL unit".into()));
        };
        if header & 0x80 != 0 {
            return Err(ValidationError::InvalidNalUnit(format!(
                "forbidden_zero_bit set in header 0x{header:02X}"
            )));
        }
        let nal_ref_idc = (header >> 5) & 0x03;
        let nal_unit_type = header & 0x1F;

        let payload = match nal_unit_type {
            NAL_UNIT_TYPE_AUD => {
                let primary_pic_type = body.first().map(|b| b >> 5).ok_or_else(|| {
                    ValidationError::InvalidNalUnit("access unit delimiter without payload".into())
                })?;
                NalPayload::AccessUnitDelimiter { primary_pic_type }
            }
            NAL_UNIT_TYPE_CODED_SLICE_NON_IDR
            | NAL_UNIT_TYPE_CODED_SLICE_IDR
            | NAL_UNIT_TYPE_CODED_SLICE_AUX => {
                NalPayload::Slice(read_slice_header(body).map_err(|e| {
                    ValidationError::InvalidNalUnit(format!(
                        "{} header: {e}",
                        nal_type_name(nal_unit_type)
                    ))
                })?)
            }
            _ => NalPayload::Other,
        };

        debug!(
            nal_unit_type,
            nal_ref_idc,
            name = nal_type_name(nal_unit_type),
            len = nal.len(),
            header = %hex_preview(nal),
            "NAL unit"
        );
        Ok(Self {
            nal_ref_idc,
            nal_unit_type,
            payload,
        })
    }

    pub fn type_name(&self) -> &'static str {
        nal_type_name(self.nal_unit_type)
    }

    pub fn is_aud(&self) -> bool {
        self.nal_unit_type == NAL_UNIT_TYPE_AUD
    }

    pub fn is_idr_slice(&self) -> bool {
        self.nal_unit_type == NAL_UNIT_TYPE_CODED_SLICE_IDR
    }

    pub fn primary_pic_type(&self) -> Option<u8> {
        match self.payload {
            NalPayload::AccessUnitDelimiter { primary_pic_type } => Some(primary_pic_type),
            _ => None,
        }
    }
}

fn read_slice_header(body: &[u8]) -> Result<SliceHeader> {
    let rbsp = remove_emulation_prevention(&body[..body.len().min(32)]);
    let mut r = BitCursor::new(&rbsp);
    Ok(SliceHeader {
        first_mb_in_slice: r.read_exp_golomb_unsigned()?,
        slice_type: r.read_exp_golomb_unsigned()?,
        pic_parameter_set_id: r.read_exp_golomb_unsigned()?,
    })
}

/// H.264 Table 7-1 names.
pub fn nal_type_name(nal_unit_type: u8) -> &'static str {
    match nal_unit_type {
        0 => "Unspecified",
        1 => "Coded slice of a non-IDR picture",
        2 => "Coded slice data partition A",
        3 => "Coded slice data partition B",
        4 => "Coded slice data partition C",
        5 => "Coded slice of an IDR picture",
        6 => "Supplemental enhancement information (SEI)",
        7 => "Sequence parameter set",
        8 => "Picture parameter set",
        9 => "Access unit delimiter",
        10 => "End of sequence",
        11 => "End of stream",
        12 => "Filler data",
        13 => "Sequence parameter set extension",
        14 => "Prefix NAL unit",
        15 => "Subset sequence parameter set",
        19 => "Coded slice of an auxiliary coded picture without partitioning",
        _ => "Reserved/Unspecified/Unknown",
    }
}

/// Slice types an AUD's primary_pic_type allows (H.264 Table 7-5).
pub fn primary_pic_type_name(primary_pic_type: u8) -> &'static str {
    match primary_pic_type {
        0 => "I",
        1 => "I, P",
        2 => "I, P, B",
        3 => "SI",
        4 => "SI, SP",
        5 => "I, SI",
        6 => "I, SI, P, SP",
        7 => "I, SI, P, SP, B",
        _ => "invalid",
    }
}

/// Whether an access unit of this primary_pic_type may be an I picture.
pub fn is_intra_primary_pic_type(primary_pic_type: u8) -> bool {
    matches!(primary_pic_type, 0 | 1 | 2 | 5 | 6 | 7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_three_and_four_byte_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x09, 0x10, // AUD
            0x00, 0x00, 0x01, 0x67, 0x42, 0x00, // SPS
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x80, // IDR
        ];
        let nals: Vec<&[u8]> = nal_units(&data).collect();
        assert_eq!(nals, vec![&[0x09, 0x10][..], &[0x67, 0x42][..], &[0x65, 0x88, 0x80][..]]);
    }

    #[test]
    fn no_start_code_no_units() {
        assert_eq!(nal_units(&[0x12, 0x34, 0x00, 0x00]).count(), 0);
    }

    #[test]
    fn decodes_aud() {
        let nal = NalUnit::parse(&[0x09, 0xF0]).unwrap();
        assert!(nal.is_aud());
        assert_eq!(nal.primary_pic_type(), Some(7));
        assert_eq!(nal.type_name(), "Access unit delimiter");
        assert_eq!(primary_pic_type_name(7), "I, SI, P, SP, B");
    }

    #[test]
    fn decodes_idr_slice_header() {
        // first_mb 0 ('1'), slice_type 7 ('0001000'), pps 0 ('1')
        let nal = NalUnit::parse(&[0x65, 0b1000_1000, 0b1000_0000]).unwrap();
        assert!(nal.is_idr_slice());
        assert_eq!(nal.nal_ref_idc, 3);
        assert_eq!(
            nal.payload,
            NalPayload::Slice(SliceHeader {
                first_mb_in_slice: 0,
                slice_type: 7,
                pic_parameter_set_id: 0
            })
        );
    }

    #[test]
    fn forbidden_bit_is_rejected() {
        assert!(matches!(
            NalUnit::parse(&[0x89, 0x10]),
            Err(ValidationError::InvalidNalUnit(_))
        ));
    }

    #[test]
    fn intra_picture_types() {
        for t in [0, 1, 2, 5, 6, 7] {
            assert!(is_intra_primary_pic_type(t));
        }
        assert!(!is_intra_primary_pic_type(3));
        assert!(!is_intra_primary_pic_type(4));
    }
}
