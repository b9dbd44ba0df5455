//! Verdict reporting: summary line and JSON document

use serde::Serialize;

use crate::error::{Diagnostics, Issue};
use crate::types::SegmentType;

/// Outcome of validating one file
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub file: String,
    pub segment_type: SegmentType,
    /// 0 when conformant, else the code of the first error
    pub status: i32,
    pub passed: bool,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub packets: u64,
    pub timestamp: String,
}

impl Verdict {
    pub fn new(
        file: impl Into<String>,
        segment_type: SegmentType,
        packets: u64,
        diagnostics: &Diagnostics,
    ) -> Self {
        let status = diagnostics.status();
        Self {
            file: file.into(),
            segment_type,
            status,
            passed: status == 0,
            errors: diagnostics.errors().to_vec(),
            warnings: diagnostics.warnings().to_vec(),
            packets,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// One-line human verdict, as printed by the CLI
    pub fn summary_line(&self) -> String {
        let category = self.segment_type.description();
        if self.passed {
            format!(
                "[SUCCESS]\tFile \"{}\" is a valid DASH MPEG-2 TS {category}",
                self.file
            )
        } else {
            format!(
                "[FAILURE]\tFile \"{}\" is not a valid DASH MPEG-2 TS {category} (message {}). \
                 Re-run with -v or -vv for details.",
                self.file, self.status
            )
        }
    }

    /// Generate pretty-printed JSON string for CLI output
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
