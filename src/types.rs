use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Result, ValidationError};

/// What kind of DASH segment the input claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    /// PAT/PMT only, no media.
    Initialization,
    /// Media segment starting with a SAP of type 1 or 2.
    Sap12,
    /// Media segment with no SAP requirement.
    General,
}

impl SegmentType {
    /// Resolve the `-i` / `-s` command-line flags; they are mutually exclusive.
    pub fn from_flags(initialization: bool, sap: Option<u8>) -> Result<Self> {
        match (initialization, sap) {
            (true, Some(_)) => Err(ValidationError::Config(
                "segment can either be initialization or start with SAP, not both".into(),
            )),
            (true, None) => Ok(SegmentType::Initialization),
            (false, Some(1 | 2)) => Ok(SegmentType::Sap12),
            (false, Some(_) | None) => Ok(SegmentType::General),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SegmentType::Initialization => "initialization segment",
            SegmentType::Sap12 => "media segment of SAP type 1/2",
            SegmentType::General => "media segment",
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, SegmentType::Initialization)
    }
}

/// Configuration options for a validation run
#[derive(Debug, Clone)]
pub struct Options {
    pub input: PathBuf,
    pub segment_type: SegmentType,
    /// Dump AVC elementary streams next to the input file.
    pub extract: bool,
    /// Print the verdict as JSON instead of the summary line.
    pub json: bool,
}
