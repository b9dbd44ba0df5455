//! H.264/AVC elementary stream checks: SAP type 1/2 start, PCR before the
//! first IDR picture, well-formed PES framing.

use std::io::Write;

use tracing::{debug, info};

use crate::constants::AVC_ES_INIT_BUF_LEN;
use crate::demux::{HandlerContext, PidHandler};
use crate::error::{Diagnostics, Result, ValidationError};
use crate::parsers::nal::{
    NAL_UNIT_TYPE_AUD, NAL_UNIT_TYPE_CODED_SLICE_AUX, NAL_UNIT_TYPE_CODED_SLICE_IDR,
    NAL_UNIT_TYPE_CODED_SLICE_NON_IDR, is_intra_primary_pic_type, primary_pic_type_name,
};
use crate::parsers::{NalUnit, nal_units};
use crate::pes::{CompletedPes, PesAssembler};
use crate::psi::ElementaryStreamInfo;
use crate::ts::TsPacket;
use crate::types::SegmentType;

/// Progress through the start of a SAP type 1/2 segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SapStage {
    SawNeither,
    SawFirstAud,
    SawIdrSlice,
}

pub struct AvcEsHandler {
    pid: u16,
    segment_type: SegmentType,
    assembler: PesAssembler,
    sap_stage: SapStage,
    saw_idr: bool,
    prev_nal: Option<NalUnit>,
    /// Bytes of elementary stream consumed so far.
    es_offset: u64,
    nal_count: u64,
    /// PCR state as of the last packet routed here.
    saw_pcr: bool,
    extract: Option<Box<dyn Write>>,
}

impl AvcEsHandler {
    pub fn new(pid: u16, segment_type: SegmentType) -> Self {
        Self {
            pid,
            segment_type,
            assembler: PesAssembler::new(pid, AVC_ES_INIT_BUF_LEN),
            sap_stage: SapStage::SawNeither,
            saw_idr: false,
            prev_nal: None,
            es_offset: 0,
            nal_count: 0,
            saw_pcr: false,
            extract: None,
        }
    }

    /// Copy every collected elementary stream byte to `sink`.
    pub fn with_extraction(mut self, sink: Box<dyn Write>) -> Self {
        self.extract = Some(sink);
        self
    }

    pub fn sap_stage(&self) -> SapStage {
        self.sap_stage
    }

    pub fn saw_idr(&self) -> bool {
        self.saw_idr
    }

    pub fn prev_nal(&self) -> Option<&NalUnit> {
        self.prev_nal.as_ref()
    }

    fn extract(&mut self, data: &[u8]) -> Result<()> {
        if let Some(sink) = self.extract.as_mut() {
            sink.write_all(data)?;
        }
        Ok(())
    }

    fn check_sap(&mut self, nal: &NalUnit) -> Result<()> {
        if self.sap_stage == SapStage::SawNeither {
            if let Some(primary_pic_type) = nal.primary_pic_type() {
                if !is_intra_primary_pic_type(primary_pic_type) {
                    return Err(ValidationError::SapViolation(format!(
                        "first AUD indicates primary picture type {primary_pic_type} ({}) instead of an I picture type",
                        primary_pic_type_name(primary_pic_type)
                    )));
                }
                debug!(pid = self.pid, primary_pic_type, "first AUD");
                self.sap_stage = SapStage::SawFirstAud;
                return Ok(());
            }
            // no AUD first: a picture slice may still start the segment
        }
        if self.sap_stage == SapStage::SawIdrSlice {
            return Ok(());
        }
        match nal.nal_unit_type {
            NAL_UNIT_TYPE_CODED_SLICE_IDR => {
                debug!(pid = self.pid, "first IDR slice");
                self.sap_stage = SapStage::SawIdrSlice;
                Ok(())
            }
            NAL_UNIT_TYPE_AUD => Err(ValidationError::SapViolation(
                "encountered a second AUD before the first picture slice".into(),
            )),
            NAL_UNIT_TYPE_CODED_SLICE_NON_IDR | NAL_UNIT_TYPE_CODED_SLICE_AUX => {
                Err(ValidationError::SapViolation(format!(
                    "encountered a non-IDR picture slice of type {} ({})",
                    nal.nal_unit_type,
                    nal.type_name()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Walk the NAL units of one complete PES payload.
    fn process_pes(&mut self, pes: &CompletedPes, saw_pcr: bool) -> Result<()> {
        self.extract(&pes.data)?;

        let mut processed = 0usize;
        for raw in nal_units(&pes.data) {
            let nal = NalUnit::parse(raw)?;
            if self.segment_type == SegmentType::Sap12 {
                self.check_sap(&nal)?;
            }
            if !self.saw_idr && nal.is_idr_slice() {
                if !saw_pcr {
                    return Err(ValidationError::MissingPcrBeforeIdr);
                }
                self.saw_idr = true;
            }
            self.prev_nal = Some(nal);
            processed += 1;
        }
        self.nal_count += processed as u64;
        self.es_offset += pes.data.len() as u64;

        if processed == 0 {
            return Err(ValidationError::NoNalUnits {
                kind: if pes.unbounded { "unbounded" } else { "bounded" },
                length: pes.data.len(),
            });
        }
        debug!(
            pid = self.pid,
            nal_units = processed,
            unbounded = pes.unbounded,
            length = pes.data.len(),
            pts = ?pes.pts,
            es_offset = self.es_offset,
            "processed PES packet"
        );
        Ok(())
    }
}

impl PidHandler for AvcEsHandler {
    fn process_ts_packet(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        packet: &TsPacket<'_>,
        _es_info: &ElementaryStreamInfo,
    ) -> Result<()> {
        self.saw_pcr = ctx.saw_pcr;
        for pes in self.assembler.push(packet, &mut *ctx.diagnostics)? {
            self.process_pes(&pes, self.saw_pcr)?;
        }
        Ok(())
    }

    fn finish(&mut self, diagnostics: &mut Diagnostics) -> Result<()> {
        if let Some(pes) = self.assembler.finish(diagnostics)? {
            if diagnostics.is_clean() {
                self.process_pes(&pes, self.saw_pcr)?;
            } else {
                self.extract(&pes.data)?;
            }
        }
        if let Some(sink) = self.extract.as_mut() {
            sink.flush()?;
        }
        info!(
            pid = self.pid,
            nal_units = self.nal_count,
            bytes = self.es_offset,
            saw_idr = self.saw_idr,
            sap_stage = ?self.sap_stage,
            "AVC elementary stream done"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::STREAM_TYPE_AVC;
    use crate::pes::tests::video_header;
    use crate::pes::write_pes_packet;
    use crate::ts::TsHeader;

    const PID: u16 = 0x100;
    const AUD_I: &[u8] = &[0, 0, 0, 1, 0x09, 0x10];
    const AUD_SI: &[u8] = &[0, 0, 0, 1, 0x09, 0x70];
    const IDR: &[u8] = &[0, 0, 1, 0x65, 0x88, 0x80];
    const NON_IDR: &[u8] = &[0, 0, 1, 0x41, 0x9A, 0x80];
    const SEI: &[u8] = &[0, 0, 1, 0x06, 0x05, 0x01, 0x80];

    fn es_info() -> ElementaryStreamInfo {
        ElementaryStreamInfo {
            stream_type: STREAM_TYPE_AVC,
            elementary_pid: PID,
            descriptors: vec![],
        }
    }

    fn pes_packet(pts: u64, nals: &[&[u8]]) -> Vec<u8> {
        let es: Vec<u8> = nals.concat();
        let mut header = video_header(pts, None);
        header.trim(es.len());
        let pes = write_pes_packet(&header, &es).unwrap();
        TsPacket {
            header: TsHeader {
                payload_unit_start_indicator: true,
                pid: PID,
                ..Default::default()
            },
            adaptation_field: None,
            payload: Some(&pes),
        }
        .write()
        .unwrap()
    }

    fn run(
        handler: &mut AvcEsHandler,
        diag: &mut Diagnostics,
        saw_pcr: bool,
        raw: &[u8],
    ) -> Result<()> {
        let packet = TsPacket::parse(raw).unwrap();
        let mut ctx = HandlerContext {
            program_number: 1,
            saw_pcr,
            diagnostics: diag,
        };
        handler.process_ts_packet(&mut ctx, &packet, &es_info())
    }

    #[test]
    fn aud_i_then_idr_reaches_saw_idr_slice() {
        let mut handler = AvcEsHandler::new(PID, SegmentType::Sap12);
        let mut diag = Diagnostics::new();
        run(&mut handler, &mut diag, true, &pes_packet(0, &[AUD_I, SEI, IDR])).unwrap();
        assert_eq!(handler.sap_stage(), SapStage::SawIdrSlice);
        assert!(handler.saw_idr());
        assert!(handler.prev_nal().unwrap().is_idr_slice());
    }

    #[test]
    fn aud_with_si_type_violates_sap() {
        let mut handler = AvcEsHandler::new(PID, SegmentType::Sap12);
        let mut diag = Diagnostics::new();
        let err = run(&mut handler, &mut diag, true, &pes_packet(0, &[AUD_SI, IDR])).unwrap_err();
        assert_eq!(err.code(), 86);
    }

    #[test]
    fn aud_si_only_types_violate_sap() {
        for pic_type in [3u8, 4] {
            let aud = [0, 0, 1, 0x09, (pic_type << 5) | 0x10];
            let mut handler = AvcEsHandler::new(PID, SegmentType::Sap12);
            let mut diag = Diagnostics::new();
            assert!(matches!(
                run(&mut handler, &mut diag, true, &pes_packet(0, &[&aud, IDR])),
                Err(ValidationError::SapViolation(_))
            ));
        }
    }

    #[test]
    fn second_aud_before_slice_violates_sap() {
        let mut handler = AvcEsHandler::new(PID, SegmentType::Sap12);
        let mut diag = Diagnostics::new();
        assert!(run(&mut handler, &mut diag, true, &pes_packet(0, &[AUD_I, AUD_I])).is_err());
    }

    #[test]
    fn non_idr_slice_first_violates_sap() {
        let mut handler = AvcEsHandler::new(PID, SegmentType::Sap12);
        let mut diag = Diagnostics::new();
        let err = run(&mut handler, &mut diag, true, &pes_packet(0, &[NON_IDR])).unwrap_err();
        assert!(matches!(err, ValidationError::SapViolation(_)));
    }

    #[test]
    fn idr_without_aud_is_accepted() {
        let mut handler = AvcEsHandler::new(PID, SegmentType::Sap12);
        let mut diag = Diagnostics::new();
        run(&mut handler, &mut diag, true, &pes_packet(0, &[SEI, IDR])).unwrap();
        assert_eq!(handler.sap_stage(), SapStage::SawIdrSlice);
    }

    #[test]
    fn general_media_segment_skips_sap_checks() {
        let mut handler = AvcEsHandler::new(PID, SegmentType::General);
        let mut diag = Diagnostics::new();
        run(&mut handler, &mut diag, false, &pes_packet(0, &[AUD_SI, NON_IDR])).unwrap();
        assert_eq!(handler.sap_stage(), SapStage::SawNeither);
    }

    #[test]
    fn idr_without_pcr_is_an_error() {
        let mut handler = AvcEsHandler::new(PID, SegmentType::General);
        let mut diag = Diagnostics::new();
        assert!(matches!(
            run(&mut handler, &mut diag, false, &pes_packet(0, &[AUD_I, IDR])),
            Err(ValidationError::MissingPcrBeforeIdr)
        ));
    }

    #[test]
    fn pes_without_nal_units_is_an_error() {
        let mut handler = AvcEsHandler::new(PID, SegmentType::General);
        let mut diag = Diagnostics::new();
        let err = run(&mut handler, &mut diag, true, &pes_packet(0, &[&[0xAB, 0xCD]])).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::NoNalUnits {
                kind: "bounded",
                length: 2
            }
        ));
    }

    #[test]
    fn extraction_receives_es_bytes() {
        use std::cell::RefCell;
        use std::rc::Rc;

        #[derive(Clone, Default)]
        struct Shared(Rc<RefCell<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = Shared::default();
        let mut handler =
            AvcEsHandler::new(PID, SegmentType::General).with_extraction(Box::new(sink.clone()));
        let mut diag = Diagnostics::new();
        run(&mut handler, &mut diag, true, &pes_packet(0, &[AUD_I, IDR])).unwrap();
        handler.finish(&mut diag).unwrap();

        assert_eq!(*sink.0.borrow(), [AUD_I, IDR].concat());
    }
}
