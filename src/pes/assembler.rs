//! Reassembly of PES packets from the TS packets of one PID.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{Diagnostics, Result, ValidationError};
use crate::pes::{PesPacket, has_pes_header};
use crate::ts::TsPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// Waiting for a packet with payload_unit_start_indicator.
    Idle,
    CollectingBounded { declared: usize },
    CollectingUnbounded,
}

/// A fully collected PES payload, header stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPes {
    pub data: Bytes,
    pub unbounded: bool,
    pub pts: Option<u64>,
}

#[derive(Debug)]
pub struct PesAssembler {
    pid: u16,
    state: AssemblyState,
    buf: BytesMut,
    pts: Option<u64>,
    prev_pts: Option<u64>,
    /// Set once the stream turns out to be scrambled or header-less.
    disabled: bool,
}

impl PesAssembler {
    pub fn new(pid: u16, capacity: usize) -> Self {
        Self {
            pid,
            state: AssemblyState::Idle,
            buf: BytesMut::with_capacity(capacity),
            pts: None,
            prev_pts: None,
            disabled: false,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Bytes collected for the PES packet in progress.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    fn disable(&mut self, diagnostics: &mut Diagnostics, err: ValidationError) {
        diagnostics.record(&err);
        self.disabled = true;
        self.state = AssemblyState::Idle;
        self.buf.clear();
    }

    fn complete(&mut self, unbounded: bool) -> CompletedPes {
        self.state = AssemblyState::Idle;
        CompletedPes {
            data: self.buf.split().freeze(),
            unbounded,
            pts: self.pts.take(),
        }
    }

    /// Feed one TS packet of this PID. Returns the PES payloads completed
    /// by it: an unbounded packet closed by this start, and/or a bounded
    /// packet whose last byte arrived here.
    pub fn push(
        &mut self,
        packet: &TsPacket<'_>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<CompletedPes>> {
        let mut completed = Vec::new();
        if self.disabled {
            return Ok(completed);
        }
        if packet.header.transport_scrambling_control != 0 {
            self.disable(diagnostics, ValidationError::ScrambledStream { pid: self.pid });
            return Ok(completed);
        }
        let Some(payload) = packet.payload.filter(|p| !p.is_empty()) else {
            return Ok(completed);
        };
        let pusi = packet.header.payload_unit_start_indicator;

        if pusi && self.state == AssemblyState::CollectingUnbounded {
            debug!(
                pid = self.pid,
                length = self.buf.len(),
                "finalized unbounded PES packet"
            );
            completed.push(self.complete(true));
        }

        let bytes = match self.state {
            AssemblyState::Idle => {
                if !pusi {
                    return Err(ValidationError::MissingPayloadStart { pid: self.pid });
                }
                let pes = PesPacket::parse(payload)?;
                if pes.header.scrambling_control() != 0 {
                    self.disable(diagnostics, ValidationError::ScrambledStream { pid: self.pid });
                    return Ok(completed);
                }
                if !has_pes_header(pes.header.stream_id) {
                    self.disable(
                        diagnostics,
                        ValidationError::UnsupportedStreamType {
                            pid: self.pid,
                            stream_id: pes.header.stream_id,
                        },
                    );
                    return Ok(completed);
                }
                let Some(pts) = pes.header.pts() else {
                    return Err(ValidationError::MissingDts);
                };
                if self.prev_pts == Some(pts) {
                    return Err(ValidationError::DuplicatePts(pts));
                }
                self.prev_pts = Some(pts);
                self.pts = Some(pts);

                self.state = if pes.header.is_unbounded() {
                    debug!(pid = self.pid, pts, "starting new unbounded PES packet");
                    AssemblyState::CollectingUnbounded
                } else {
                    let declared = pes.header.declared_payload_len()?;
                    debug!(pid = self.pid, pts, declared, "starting new bounded PES packet");
                    AssemblyState::CollectingBounded { declared }
                };
                pes.payload
            }
            AssemblyState::CollectingBounded { declared } => {
                if pusi {
                    return Err(ValidationError::UnexpectedPayloadStart {
                        collected: self.buf.len(),
                        declared,
                    });
                }
                payload
            }
            AssemblyState::CollectingUnbounded => payload,
        };

        match self.state {
            AssemblyState::CollectingBounded { declared } => {
                let left = declared - self.buf.len();
                self.buf.extend_from_slice(&bytes[..left.min(bytes.len())]);
                if self.buf.len() == declared {
                    debug!(pid = self.pid, length = declared, "collected bounded PES packet");
                    completed.push(self.complete(false));
                }
            }
            AssemblyState::CollectingUnbounded => self.buf.extend_from_slice(bytes),
            AssemblyState::Idle => {}
        }
        Ok(completed)
    }

    /// End of input. An unfinished unbounded packet is handed back (and
    /// warned about); an unfinished bounded one is an error, reported only
    /// while no earlier error was recorded.
    pub fn finish(&mut self, diagnostics: &mut Diagnostics) -> Result<Option<CompletedPes>> {
        if self.disabled {
            return Ok(None);
        }
        match self.state {
            AssemblyState::Idle => Ok(None),
            AssemblyState::CollectingUnbounded => {
                diagnostics.record(&ValidationError::IncompleteUnboundedPes {
                    collected: self.buf.len(),
                });
                Ok(Some(self.complete(true)))
            }
            AssemblyState::CollectingBounded { declared } => {
                let remaining = declared - self.buf.len();
                self.state = AssemblyState::Idle;
                self.buf.clear();
                if diagnostics.is_clean() {
                    return Err(ValidationError::IncompleteBoundedPes {
                        declared,
                        remaining,
                    });
                }
                Ok(None)
            }
        }
    }
}
