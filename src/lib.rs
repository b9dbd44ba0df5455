// src/lib.rs
pub mod validate {
    pub use crate::report::Verdict;
    pub use crate::types::{Options, SegmentType};

    /// Validate one segment file; the verdict carries the exit status.
    pub fn run(opts: &Options) -> anyhow::Result<Verdict> {
        crate::core::run(opts)
    }
}

pub mod avc;
pub mod bits;
pub mod constants;
mod core;
pub mod crc32;
pub mod demux;
pub mod error;
pub mod parsers;
pub mod pes;
pub mod psi;
pub mod report;
pub mod ts;
pub mod types;
pub mod validator;

pub use crate::core::extraction_path;
pub use error::{Diagnostics, Issue, Result, ValidationError};
pub use validator::Validator;
