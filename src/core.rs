use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::{debug, info};

use crate::constants::TS_PACKET_SIZE;
use crate::error::ValidationError;
use crate::report::Verdict;
use crate::types::Options;
use crate::validator::{Extractor, Validator};

/// Validate `opts.input` from start to end and return the verdict.
pub fn run(opts: &Options) -> anyhow::Result<Verdict> {
    let file = File::open(&opts.input)
        .with_context(|| format!("opening {}", opts.input.display()))?;
    let mut reader = BufReader::new(file);
    let name = opts.input.display().to_string();

    let mut validator = Validator::new(opts.segment_type);
    if opts.extract {
        validator = validator.with_extractor(extractor_for(&opts.input));
    }
    info!(file = %name, segment = opts.segment_type.description(), "validating");

    let mut buf = [0u8; TS_PACKET_SIZE];
    let mut offset = 0u64;
    loop {
        let n = read_packet(&mut reader, &mut buf);
        match n {
            Ok(0) => break,
            Ok(TS_PACKET_SIZE) => {
                debug!(offset = format_args!("0x{offset:08X}"), "reading TS packet");
                if validator.feed(&buf).is_err() {
                    break;
                }
                offset += TS_PACKET_SIZE as u64;
            }
            Ok(actual) => {
                validator.record(&ValidationError::TruncatedPacket {
                    expected: TS_PACKET_SIZE,
                    actual,
                });
                break;
            }
            Err(err) => {
                validator.record(&ValidationError::Io(err));
                break;
            }
        }
    }

    let packets = validator.packets();
    let diagnostics = validator.finish();
    Ok(Verdict::new(name, opts.segment_type, packets, &diagnostics))
}

/// Fill `buf` as far as the input allows; a short count means end of file.
fn read_packet(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// `<input>.AVC_elementary_stream.PID_0x%04X.264`
pub fn extraction_path(input: &Path, pid: u16) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(format!(".AVC_elementary_stream.PID_0x{pid:04X}.264"));
    PathBuf::from(name)
}

fn extractor_for(input: &Path) -> Extractor {
    let input = input.to_path_buf();
    Box::new(move |pid| {
        let path = extraction_path(&input, pid);
        info!(pid, path = %path.display(), "extracting elementary stream");
        let sink: Box<dyn Write> = Box::new(BufWriter::new(File::create(path)?));
        Ok(sink)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_file_name() {
        assert_eq!(
            extraction_path(Path::new("/tmp/seg1.ts"), 0x100),
            PathBuf::from("/tmp/seg1.ts.AVC_elementary_stream.PID_0x0100.264")
        );
    }

    #[test]
    fn short_reads_are_joined() {
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = self.0.len().min(buf.len()).min(7);
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let data = vec![0x47u8; 200];
        let mut reader = Trickle(&data);
        let mut buf = [0u8; TS_PACKET_SIZE];
        assert_eq!(read_packet(&mut reader, &mut buf).unwrap(), TS_PACKET_SIZE);
        assert_eq!(read_packet(&mut reader, &mut buf).unwrap(), 12);
        assert_eq!(read_packet(&mut reader, &mut buf).unwrap(), 0);
    }
}
