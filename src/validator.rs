//! Segment-level conformance driver, fed one 188-byte packet at a time.

use std::io::{self, Write};

use tracing::{debug, info};

use crate::avc::AvcEsHandler;
use crate::constants::{
    CAT_PID, GENERAL_PURPOSE_PID_MAX, GENERAL_PURPOSE_PID_MIN, IPMP_CIT_PID, NULL_PID, PAT_PID,
    STREAM_TYPE_AAC_ADTS, STREAM_TYPE_AAC_LATM, STREAM_TYPE_AAC_RAW, STREAM_TYPE_AVC,
    STREAM_TYPE_MPEG1_AUDIO, STREAM_TYPE_MPEG1_VIDEO, STREAM_TYPE_MPEG2_AUDIO,
    STREAM_TYPE_MPEG2_VIDEO, STREAM_TYPE_MPEG4_VIDEO, TSDT_PID,
};
use crate::demux::{Program, Stream};
use crate::error::{Diagnostics, Result, ValidationError};
use crate::psi::{ElementaryStreamInfo, parse_pat, section_start, stream_type_name};
use crate::ts::TsPacket;
use crate::types::SegmentType;

/// Opens the extraction sink for an AVC elementary PID.
pub type Extractor = Box<dyn FnMut(u16) -> io::Result<Box<dyn Write>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingPat,
    AwaitingPmt { program_number: u16, pmt_pid: u16 },
    Streaming,
}

pub struct Validator {
    segment_type: SegmentType,
    phase: Phase,
    stream: Stream,
    diagnostics: Diagnostics,
    extractor: Option<Extractor>,
    packets: u64,
    /// Reserved PIDs already warned about.
    warned_pids: Vec<u16>,
    warned_pat_version: bool,
}

/// Stream types that carry audio or video access units.
pub fn is_media_stream_type(stream_type: u8) -> bool {
    matches!(
        stream_type,
        STREAM_TYPE_MPEG1_VIDEO
            | STREAM_TYPE_MPEG2_VIDEO
            | STREAM_TYPE_MPEG1_AUDIO
            | STREAM_TYPE_MPEG2_AUDIO
            | STREAM_TYPE_AAC_ADTS
            | STREAM_TYPE_MPEG4_VIDEO
            | STREAM_TYPE_AAC_LATM
            | STREAM_TYPE_AAC_RAW
            | STREAM_TYPE_AVC
    )
}

impl Validator {
    pub fn new(segment_type: SegmentType) -> Self {
        Self {
            segment_type,
            phase: Phase::AwaitingPat,
            stream: Stream::new(),
            diagnostics: Diagnostics::new(),
            extractor: None,
            packets: 0,
            warned_pids: Vec::new(),
            warned_pat_version: false,
        }
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Record an error raised outside packet processing, such as a short read.
    pub fn record(&mut self, err: &ValidationError) {
        self.diagnostics.record(err);
    }

    /// Validate one TS packet. A returned error is already recorded and
    /// ends the run.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.packets += 1;
        self.process(data).inspect_err(|err| self.diagnostics.record(err))
    }

    fn process(&mut self, data: &[u8]) -> Result<()> {
        let packet = TsPacket::parse(data)?;
        let pid = packet.pid();
        match self.phase {
            Phase::AwaitingPat => {
                if pid == PAT_PID {
                    self.read_pat(&packet)?;
                }
            }
            Phase::AwaitingPmt {
                program_number,
                pmt_pid,
            } => {
                if pid == pmt_pid {
                    self.stream.read_ts_packet(&packet, &mut self.diagnostics)?;
                    self.install_handlers(program_number)?;
                }
            }
            Phase::Streaming => self.route(&packet)?,
        }
        Ok(())
    }

    fn read_pat(&mut self, packet: &TsPacket<'_>) -> Result<()> {
        let Some(payload) = packet.payload.filter(|_| packet.header.payload_unit_start_indicator)
        else {
            debug!(packet = self.packets, "PAT packet without section start skipped");
            return Ok(());
        };
        let pat = parse_pat(section_start(payload)?)?;

        let &[entry] = pat.programs.as_slice() else {
            return Err(ValidationError::MultiProgram(pat.programs.len()));
        };
        if entry.program_number == 0 {
            return Err(ValidationError::NitNotSupported);
        }
        if !(GENERAL_PURPOSE_PID_MIN..=GENERAL_PURPOSE_PID_MAX).contains(&entry.pid) {
            return Err(ValidationError::InvalidPid {
                field: "PMT PID",
                pid: entry.pid,
            });
        }

        self.stream.pat = Some(pat);
        self.stream
            .programs
            .push(Program::new(entry.program_number, entry.pid));
        self.phase = Phase::AwaitingPmt {
            program_number: entry.program_number,
            pmt_pid: entry.pid,
        };
        Ok(())
    }

    /// Attach handlers once the program's PMT is known.
    fn install_handlers(&mut self, program_number: u16) -> Result<()> {
        let segment_type = self.segment_type;
        let Some(program) = self.stream.program_mut(program_number) else {
            return Ok(());
        };
        let Some(es_list) = program.pmt.as_ref().map(|pmt| pmt.es_info.clone()) else {
            return Ok(());
        };

        for ElementaryStreamInfo {
            stream_type,
            elementary_pid: pid,
            ..
        } in es_list
        {
            if segment_type == SegmentType::Initialization && is_media_stream_type(stream_type) {
                return Err(ValidationError::MediaInInitSegment { pid, stream_type });
            }
            if stream_type != STREAM_TYPE_AVC {
                self.diagnostics.warn(format!(
                    "no handler for stream type 0x{stream_type:02X} ({}) on PID 0x{pid:04X}",
                    stream_type_name(stream_type)
                ));
                continue;
            }

            let mut handler = AvcEsHandler::new(pid, segment_type);
            if let Some(open) = self.extractor.as_mut() {
                handler = handler.with_extraction(open(pid)?);
                debug!(pid, "extracting AVC elementary stream");
            }
            program.register_pid_processor(pid, Box::new(handler))?;
            info!(pid, mode = segment_type.description(), "AVC handler registered");
        }
        self.phase = Phase::Streaming;
        Ok(())
    }

    fn route(&mut self, packet: &TsPacket<'_>) -> Result<()> {
        let pid = packet.pid();
        match pid {
            PAT_PID => {
                let Some(payload) = packet
                    .payload
                    .filter(|_| packet.header.payload_unit_start_indicator)
                else {
                    return Ok(());
                };
                let pat = parse_pat(section_start(payload)?)?;
                let current = self.stream.pat.as_ref().map(|p| p.version_number);
                if current != Some(pat.version_number) && !self.warned_pat_version {
                    self.warned_pat_version = true;
                    self.diagnostics.warn(format!(
                        "PAT version change to {} not supported",
                        pat.version_number
                    ));
                }
            }
            CAT_PID | TSDT_PID | IPMP_CIT_PID => {
                if !self.warned_pids.contains(&pid) {
                    self.warned_pids.push(pid);
                    let table = match pid {
                        CAT_PID => "CAT",
                        TSDT_PID => "TSDT",
                        _ => "IPMP CIT",
                    };
                    self.diagnostics
                        .warn(format!("{table} section not supported, ignoring PID 0x{pid:04X}"));
                }
            }
            NULL_PID => {}
            _ if pid < GENERAL_PURPOSE_PID_MIN => {
                debug!(pid, "reserved PID skipped");
            }
            _ => self.stream.read_ts_packet(packet, &mut self.diagnostics)?,
        }
        Ok(())
    }

    /// End of input: run the segment-wide checks, tear down the handlers
    /// and hand back everything recorded.
    pub fn finish(mut self) -> Diagnostics {
        if self.diagnostics.is_clean() {
            let missing = match self.phase {
                Phase::AwaitingPat => Some(ValidationError::PatNotFound),
                Phase::AwaitingPmt {
                    program_number,
                    pmt_pid,
                } => Some(ValidationError::PmtNotFound {
                    program_number,
                    pid: pmt_pid,
                }),
                Phase::Streaming if self.segment_type.is_media() && !self.stream.saw_pcr() => {
                    Some(ValidationError::NoPcrInSegment)
                }
                Phase::Streaming => None,
            };
            if let Some(err) = missing {
                self.diagnostics.record(&err);
            }
        }
        self.stream.finish(&mut self.diagnostics);
        info!(
            packets = self.packets,
            status = self.diagnostics.status(),
            warnings = self.diagnostics.warnings().len(),
            "validation finished"
        );
        self.diagnostics
    }
}
