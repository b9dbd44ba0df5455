pub mod descriptor;
pub mod section;
pub mod pat;
pub mod pmt;

pub use descriptor::{Descriptor, LanguageEntry};
pub use pat::{parse_pat, PatEntry, PatSection};
pub use pmt::{parse_pmt, stream_type_name, ElementaryStreamInfo, PmtSection};
pub use section::section_start;
