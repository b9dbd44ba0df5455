//! Elementary stream parsers
//!
//! Only H.264/AVC is inspected: NAL units are located by start code and
//! decoded just far enough to drive the segment checks.

pub mod nal;
mod utils;

pub use nal::{NalPayload, NalUnit, SliceHeader, nal_units};
pub use utils::hex_preview;
