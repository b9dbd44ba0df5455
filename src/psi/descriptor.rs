//! Descriptor loops found in PMT program info and ES info.

use tracing::debug;

use crate::bits::{BitCursor, BitWriter};
use crate::constants::ISO_639_LANGUAGE_DESCRIPTOR;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// ISO_639_language_descriptor
    Language(Vec<LanguageEntry>),
    /// Anything without a dedicated decoder, kept verbatim.
    Other { tag: u8, data: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageEntry {
    pub language_code: [u8; 3],
    pub audio_type: u8,
}

impl LanguageEntry {
    pub fn language(&self) -> String {
        String::from_utf8_lossy(&self.language_code).into_owned()
    }
}

impl Descriptor {
    pub fn tag(&self) -> u8 {
        match self {
            Descriptor::Language(_) => ISO_639_LANGUAGE_DESCRIPTOR,
            Descriptor::Other { tag, .. } => *tag,
        }
    }

    /// Payload length, excluding the tag and length bytes.
    pub fn data_len(&self) -> usize {
        match self {
            Descriptor::Language(entries) => entries.len() * 4,
            Descriptor::Other { data, .. } => data.len(),
        }
    }

    fn decode(tag: u8, data: &[u8]) -> Result<Self> {
        // a language descriptor with a ragged length is kept opaque
        if tag != ISO_639_LANGUAGE_DESCRIPTOR || data.len() % 4 != 0 {
            return Ok(Descriptor::Other {
                tag,
                data: data.to_vec(),
            });
        }
        let mut r = BitCursor::new(data);
        let mut entries = Vec::with_capacity(data.len() / 4);
        for _ in 0..data.len() / 4 {
            let code = r.read_bytes(3)?;
            let entry = LanguageEntry {
                language_code: [code[0], code[1], code[2]],
                audio_type: r.read_u8()?,
            };
            debug!(
                language = %entry.language(),
                audio_type = entry.audio_type,
                "ISO_639_language_descriptor"
            );
            entries.push(entry);
        }
        Ok(Descriptor::Language(entries))
    }

    pub fn write(&self, w: &mut BitWriter) -> Result<()> {
        w.write_u8(self.tag())?;
        w.write_u8(self.data_len() as u8)?;
        match self {
            Descriptor::Language(entries) => {
                for entry in entries {
                    w.write_bytes(&entry.language_code)?;
                    w.write_u8(entry.audio_type)?;
                }
                Ok(())
            }
            Descriptor::Other { data, .. } => w.write_bytes(data),
        }
    }
}

/// Decode `length` bytes of (tag, length, data) triples.
pub fn read_descriptors(r: &mut BitCursor<'_>, length: usize) -> Result<Vec<Descriptor>> {
    let mut lr = BitCursor::new(r.read_bytes(length)?);
    let mut descriptors = Vec::new();
    while lr.bytes_remaining() > 0 {
        let tag = lr.read_u8()?;
        let len = usize::from(lr.read_u8()?);
        let data = lr.read_bytes(len)?;
        debug!(tag = format_args!("0x{tag:02X}"), length = len, "descriptor");
        descriptors.push(Descriptor::decode(tag, data)?);
    }
    Ok(descriptors)
}

/// Total encoded size of a descriptor loop.
pub fn descriptors_len(descriptors: &[Descriptor]) -> usize {
    descriptors.iter().map(|d| 2 + d.data_len()).sum()
}

pub fn write_descriptors(w: &mut BitWriter, descriptors: &[Descriptor]) -> Result<()> {
    for descriptor in descriptors {
        descriptor.write(w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn language_descriptor_is_decoded() {
        let data = [0x0A, 0x08, b'e', b'n', b'g', 0x00, b'f', b'r', b'a', 0x03, 0x52, 0x01, 0x07];
        let mut r = BitCursor::new(&data);
        let descriptors = read_descriptors(&mut r, data.len()).unwrap();

        assert_eq!(descriptors.len(), 2);
        match &descriptors[0] {
            Descriptor::Language(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].language(), "eng");
                assert_eq!(entries[1].language(), "fra");
                assert_eq!(entries[1].audio_type, 3);
            }
            other => panic!("unexpected descriptor {other:?}"),
        }
        assert_eq!(
            descriptors[1],
            Descriptor::Other {
                tag: 0x52,
                data: vec![0x07]
            }
        );
        assert_eq!(descriptors_len(&descriptors), data.len());
    }

    #[test]
    fn descriptor_overrunning_loop_fails() {
        let data = [0x52, 0x05, 0x01];
        let mut r = BitCursor::new(&data);
        assert!(matches!(
            read_descriptors(&mut r, data.len()),
            Err(ValidationError::OutOfData { .. })
        ));
    }

    #[test]
    fn written_loop_reads_back() {
        let descriptors = vec![
            Descriptor::Language(vec![LanguageEntry {
                language_code: *b"deu",
                audio_type: 0,
            }]),
            Descriptor::Other {
                tag: 0x28,
                data: vec![0x4D, 0x40, 0x1F, 0x3F],
            },
        ];
        let mut w = BitWriter::new();
        write_descriptors(&mut w, &descriptors).unwrap();
        let bytes = w.into_bytes().unwrap();

        let mut r = BitCursor::new(&bytes);
        assert_eq!(read_descriptors(&mut r, bytes.len()).unwrap(), descriptors);
    }
}
