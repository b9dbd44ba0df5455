//! PID demultiplexer: programs, their PMTs and per-PID handlers.

use tracing::{debug, info};

use crate::constants::PAT_PID;
use crate::error::{Diagnostics, Result, ValidationError};
use crate::psi::{ElementaryStreamInfo, PatSection, PmtSection, parse_pmt, section_start};
use crate::ts::TsPacket;

/// State a handler sees besides its own.
pub struct HandlerContext<'a> {
    pub program_number: u16,
    /// A PCR has been seen on this program's PCR_PID, this packet included.
    pub saw_pcr: bool,
    pub diagnostics: &'a mut Diagnostics,
}

/// Consumer of the TS packets of one elementary PID.
pub trait PidHandler {
    fn process_ts_packet(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        packet: &TsPacket<'_>,
        es_info: &ElementaryStreamInfo,
    ) -> Result<()>;

    /// End of input; report anything left unfinished.
    fn finish(&mut self, diagnostics: &mut Diagnostics) -> Result<()>;
}

pub struct PidInfo {
    pub es_info: ElementaryStreamInfo,
    pub handler: Option<Box<dyn PidHandler>>,
}

pub struct Program {
    /// PID carrying this program's PMT.
    pub pid: u16,
    pub program_number: u16,
    pub pmt: Option<PmtSection>,
    pids: Vec<PidInfo>,
    pub saw_pcr: bool,
    warned_pmt_version: bool,
}

impl Program {
    pub fn new(program_number: u16, pid: u16) -> Self {
        Self {
            pid,
            program_number,
            pmt: None,
            pids: Vec::new(),
            saw_pcr: false,
            warned_pmt_version: false,
        }
    }

    /// Attach `handler` to an elementary PID listed in the PMT, replacing
    /// any handler registered before.
    pub fn register_pid_processor(&mut self, pid: u16, handler: Box<dyn PidHandler>) -> Result<()> {
        let es_info = self
            .pmt
            .as_ref()
            .and_then(|pmt| pmt.find_es(pid))
            .cloned()
            .ok_or(ValidationError::UnknownPidRegistration {
                pid,
                program_number: self.program_number,
            })?;
        match self.pids.iter_mut().find(|p| p.es_info.elementary_pid == pid) {
            Some(info) => info.handler = Some(handler),
            None => self.pids.push(PidInfo {
                es_info,
                handler: Some(handler),
            }),
        }
        debug!(program_number = self.program_number, pid, "registered PID handler");
        Ok(())
    }

    /// Detach and return the handler of `pid`, if any.
    pub fn unregister_pid_processor(&mut self, pid: u16) -> Option<Box<dyn PidHandler>> {
        self.pids
            .iter_mut()
            .find(|p| p.es_info.elementary_pid == pid)
            .and_then(|p| p.handler.take())
    }

    pub fn pid_info(&self, pid: u16) -> Option<&PidInfo> {
        self.pids.iter().find(|p| p.es_info.elementary_pid == pid)
    }

    fn read_pmt(&mut self, packet: &TsPacket<'_>, diagnostics: &mut Diagnostics) -> Result<()> {
        let Some(payload) = packet.payload else {
            return Ok(());
        };
        if !packet.header.payload_unit_start_indicator {
            debug!(pid = self.pid, "PMT continuation packet ignored");
            return Ok(());
        }
        let pmt = parse_pmt(section_start(payload)?)?;
        if pmt.program_number != self.program_number {
            return Err(ValidationError::ProgramNumberMismatch {
                expected: self.program_number,
                actual: pmt.program_number,
            });
        }
        match &self.pmt {
            Some(current) => {
                if current.version_number != pmt.version_number && !self.warned_pmt_version {
                    self.warned_pmt_version = true;
                    diagnostics.warn(format!(
                        "PMT version change {} -> {} on program {} not supported, keeping the original",
                        current.version_number, pmt.version_number, self.program_number
                    ));
                }
            }
            None => {
                info!(
                    program_number = self.program_number,
                    pcr_pid = pmt.pcr_pid,
                    streams = pmt.es_info.len(),
                    "PMT installed"
                );
                self.pids = pmt
                    .es_info
                    .iter()
                    .map(|es| PidInfo {
                        es_info: es.clone(),
                        handler: None,
                    })
                    .collect();
                self.pmt = Some(pmt);
            }
        }
        Ok(())
    }

    fn finish(&mut self, diagnostics: &mut Diagnostics) {
        for info in &mut self.pids {
            if let Some(handler) = info.handler.as_mut() {
                if let Err(err) = handler.finish(diagnostics) {
                    diagnostics.record(&err);
                }
            }
        }
    }
}

/// Everything known about one transport stream.
#[derive(Default)]
pub struct Stream {
    pub pat: Option<PatSection>,
    pub programs: Vec<Program>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program_mut(&mut self, program_number: u16) -> Option<&mut Program> {
        self.programs
            .iter_mut()
            .find(|p| p.program_number == program_number)
    }

    pub fn saw_pcr(&self) -> bool {
        self.programs.iter().any(|p| p.saw_pcr)
    }

    /// Route one packet: PMT PIDs to the PMT parser, registered elementary
    /// PIDs to their handlers. A PID may belong to several programs.
    pub fn read_ts_packet(&mut self, packet: &TsPacket<'_>, diagnostics: &mut Diagnostics) -> Result<()> {
        let pid = packet.pid();
        if self.pat.is_none() && pid != PAT_PID {
            return Ok(());
        }

        for program in &mut self.programs {
            if let (Some(pmt), Some(pcr)) = (&program.pmt, packet.pcr()) {
                if pmt.pcr_pid == pid {
                    if !program.saw_pcr {
                        info!(program_number = program.program_number, pcr = pcr.as_27mhz(), "first PCR");
                    }
                    program.saw_pcr = true;
                }
            }

            if program.pid == pid {
                program.read_pmt(packet, diagnostics)?;
                continue;
            }

            let mut ctx = HandlerContext {
                program_number: program.program_number,
                saw_pcr: program.saw_pcr,
                diagnostics: &mut *diagnostics,
            };
            let info = program.pids.iter_mut().find(|p| p.es_info.elementary_pid == pid);
            if let Some(PidInfo {
                es_info,
                handler: Some(handler),
            }) = info
            {
                handler.process_ts_packet(&mut ctx, packet, es_info)?;
            }
        }
        Ok(())
    }

    /// Tear down every handler, recording what they report.
    pub fn finish(&mut self, diagnostics: &mut Diagnostics) {
        for program in &mut self.programs {
            program.finish(diagnostics);
        }
    }
}
