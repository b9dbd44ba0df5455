//! Validation error kinds and the run-wide diagnostics log.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Everything that can make a segment non-conformant, plus the plumbing
/// failures of the bit reader and the driver.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// I/O failure in the driver (file read, extraction sink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid combination of command-line options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The bit reader was asked for more bits than the buffer holds.
    #[error("out of data: needed {needed} bits, {available} available")]
    OutOfData { needed: usize, available: usize },

    /// A byte-level read was attempted while not on a byte boundary.
    #[error("byte read at unaligned bit position")]
    UnalignedRead,

    /// Exp-Golomb code with more than 31 leading zero bits.
    #[error("Exp-Golomb code too long ({0} leading zero bits)")]
    ExpGolombOverflow(u32),

    #[error("got 0x{0:02X} instead of expected sync byte 0x47")]
    InvalidSyncByte(u8),

    #[error("uncorrectable bit error in TS packet (PID 0x{pid:04X})")]
    TransportErrorIndicator { pid: u16 },

    #[error("truncated TS packet: expected {expected} bytes, got {actual}")]
    TruncatedPacket { expected: usize, actual: usize },

    #[error("adaptation field length {length} exceeds the {available} bytes left in the packet")]
    AdaptationFieldOverflow { length: usize, available: usize },

    #[error("no PAT found in the segment")]
    PatNotFound,

    #[error("no PMT found for program {program_number} (PID 0x{pid:04X})")]
    PmtNotFound { program_number: u16, pid: u16 },

    #[error("table ID in {table} is 0x{actual:02X} instead of expected 0x{expected:02X}")]
    TableIdMismatch {
        table: &'static str,
        expected: u8,
        actual: u8,
    },

    /// Syntax indicator unset, length overflow, non-zero section numbers.
    #[error("bad {table} section syntax: {reason}")]
    SectionSyntax { table: &'static str, reason: String },

    #[error("{table} CRC_32 specified as 0x{expected:08X}, but calculated as 0x{computed:08X}")]
    CrcMismatch {
        table: &'static str,
        expected: u32,
        computed: u32,
    },

    #[error("PAT lists {0} programs; only SPTS is supported in DASH")]
    MultiProgram(usize),

    #[error("NIT (program number 0) not supported")]
    NitNotSupported,

    #[error("{field} has invalid value 0x{pid:04X}")]
    InvalidPid { field: &'static str, pid: u16 },

    #[error("invalid program number in PMT: expecting {expected}, encountered {actual}")]
    ProgramNumberMismatch { expected: u16, actual: u16 },

    #[error("elementary stream with PID 0x{pid:04X} not found in PMT of program {program_number}")]
    UnknownPidRegistration { pid: u16, program_number: u16 },

    #[error("no PCR is associated with program {program_number}")]
    NoProgramPcr { program_number: u16 },

    #[error("media stream (type 0x{stream_type:02X}, PID 0x{pid:04X}) not allowed in initialization segments")]
    MediaInInitSegment { pid: u16, stream_type: u8 },

    #[error("no PCR information in the segment")]
    NoPcrInSegment,

    #[error("scrambled elementary stream on PID 0x{pid:04X} not supported")]
    ScrambledStream { pid: u16 },

    #[error("PES stream id 0x{stream_id:02X} on PID 0x{pid:04X} not supported, ignoring")]
    UnsupportedStreamType { pid: u16, stream_id: u8 },

    #[error("malformed PES packet header: {0}")]
    PesHeaderMalformed(String),

    #[error(
        "collecting a bounded PES packet ({collected} of {declared} bytes), not expecting payload_unit_start_indicator"
    )]
    UnexpectedPayloadStart { collected: usize, declared: usize },

    #[error("expecting payload_unit_start_indicator to start a new PES packet on PID 0x{pid:04X}")]
    MissingPayloadStart { pid: u16 },

    #[error("duplicate PTS timestamp ({0}) in PES packets")]
    DuplicatePts(u64),

    #[error("no DTS in PES packet")]
    MissingDts,

    #[error("no PCR before the first coded slice of an IDR picture")]
    MissingPcrBeforeIdr,

    #[error("SAP type 1/2 requirement violated: {0}")]
    SapViolation(String),

    #[error("invalid NAL unit: {0}")]
    InvalidNalUnit(String),

    #[error("could not find any NAL units in {kind} PES packet of length {length}")]
    NoNalUnits { kind: &'static str, length: usize },

    #[error(
        "last PES packet was a bounded one and wasn't completely collected (length {declared}, remaining {remaining})"
    )]
    IncompleteBoundedPes { declared: usize, remaining: usize },

    #[error("last PES packet was an unbounded one, unclear whether it was completely collected ({collected} bytes)")]
    IncompleteUnboundedPes { collected: usize },
}

impl ValidationError {
    /// Numeric message code; doubles as the process exit status.
    pub fn code(&self) -> i32 {
        use ValidationError::*;
        match self {
            OutOfData { .. } | UnalignedRead | ExpGolombOverflow(_) => 1,
            Config(_) => 2,
            PatNotFound => 3,
            PmtNotFound { .. } => 4,
            MultiProgram(_) => 6,
            NitNotSupported => 7,
            InvalidPid { .. } => 8,
            InvalidSyncByte(_) => 10,
            TransportErrorIndicator { .. } => 11,
            AdaptationFieldOverflow { .. } => 12,
            UnknownPidRegistration { .. } => 13,
            Io(_) => 15,
            TruncatedPacket { .. } => 16,
            NoPcrInSegment | MediaInInitSegment { .. } => 17,
            NoProgramPcr { .. } => 18,
            TableIdMismatch { .. } => 30,
            SectionSyntax { .. } => 31,
            CrcMismatch { .. } => 33,
            ProgramNumberMismatch { .. } => 70,
            InvalidNalUnit(_) => 81,
            DuplicatePts(_) => 85,
            SapViolation(_) => 86,
            MissingDts | MissingPcrBeforeIdr => 87,
            PesHeaderMalformed(_) | UnexpectedPayloadStart { .. } => 88,
            NoNalUnits { .. } => 89,
            IncompleteBoundedPes { .. } => 91,
            MissingPayloadStart { .. } => 92,
            IncompleteUnboundedPes { .. } => 93,
            ScrambledStream { .. } => 94,
            UnsupportedStreamType { .. } => 95,
        }
    }

    /// Soft conditions disable a single stream (or are merely suspicious)
    /// without making the segment non-conformant.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ValidationError::ScrambledStream { .. }
                | ValidationError::UnsupportedStreamType { .. }
                | ValidationError::IncompleteUnboundedPes { .. }
        )
    }
}

/// Result type for validation operations
pub type Result<T> = std::result::Result<T, ValidationError>;

/// One recorded problem, flattened for the report.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub code: i32,
    pub message: String,
}

impl From<&ValidationError> for Issue {
    fn from(err: &ValidationError) -> Self {
        Issue {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Run-wide error log. The first hard error fixes the exit status; later
/// ones are kept for the report but never overwrite it.
#[derive(Debug, Default)]
pub struct Diagnostics {
    first_error: Option<i32>,
    errors: Vec<Issue>,
    warnings: Vec<Issue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error, routing soft conditions to the warning list.
    pub fn record(&mut self, err: &ValidationError) {
        if err.is_soft() {
            warn!("{err}");
            self.warnings.push(err.into());
            return;
        }
        error!(code = err.code(), "{err}");
        if self.first_error.is_none() {
            self.first_error = Some(err.code());
        }
        self.errors.push(err.into());
    }

    /// Free-form warning that has no error kind of its own.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(Issue { code: 0, message });
    }

    /// `true` while no hard error has been recorded.
    pub fn is_clean(&self) -> bool {
        self.first_error.is_none()
    }

    /// Exit status: 0 when conformant, else the first error's code.
    pub fn status(&self) -> i32 {
        self.first_error.unwrap_or(0)
    }

    pub fn errors(&self) -> &[Issue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Issue] {
        &self.warnings
    }
}
