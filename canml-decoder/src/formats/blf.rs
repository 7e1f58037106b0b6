//! BLF (Binary Log Format) frame source
//!
//! Reads Vector BLF files using the `ablf` crate. Only CAN message objects
//! (type 86) become frames; log containers are unpacked by `ablf` and every
//! other object type is skipped.

use crate::formats::LogFileParser;
use crate::types::{DecoderError, RawFrame, Result};
use ablf::{BlfFile, ObjectTypes};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Payload length for a data length code
fn payload_len(dlc: u8) -> usize {
    match dlc {
        0..=8 => dlc as usize,
        9 => 12,
        10 => 16,
        11 => 20,
        12 => 24,
        13 => 32,
        14 => 48,
        _ => 64,
    }
}

pub struct BlfParser;

impl BlfParser {
    /// Open a BLF file and return an iterator over its CAN frames
    pub fn parse(path: &Path) -> Result<BlfFrameIterator> {
        log::info!("Parsing BLF file: {:?}", path);

        if !path.exists() {
            return Err(DecoderError::LogParse(format!("BLF file not found: {:?}", path)));
        }

        let file = File::open(path)
            .map_err(|e| DecoderError::LogParse(format!("Failed to open BLF file {:?}: {}", path, e)))?;

        let blf = BlfFile::from_reader(BufReader::new(file))
            .map_err(|(e, _)| DecoderError::LogParse(format!("Failed to parse BLF file {:?}: {}", path, e)))?;

        if !blf.is_valid() {
            return Err(DecoderError::LogParse(format!("Invalid BLF file format: {:?}", path)));
        }

        Ok(BlfFrameIterator {
            objects: blf.into_iter(),
            skipped_types: HashSet::new(),
        })
    }
}

/// Iterator over CAN frames from a BLF file
pub struct BlfFrameIterator {
    objects: ablf::ObjectIterator<BufReader<File>>,
    skipped_types: HashSet<u32>,
}

impl LogFileParser for BlfFrameIterator {
    fn parse(path: &Path) -> Result<Self> {
        BlfParser::parse(path)
    }
}

impl Iterator for BlfFrameIterator {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let obj = self.objects.next()?;
            match obj.data {
                ObjectTypes::CanMessage86(msg) => {
                    let mut data = msg.data;
                    data.truncate(payload_len(msg.dlc));
                    return Some(Ok(RawFrame {
                        timestamp_ns: msg.header.timestamp_ns,
                        channel: msg.channel as u8,
                        can_id: msg.id,
                        data,
                    }));
                }
                _ => {
                    if self.skipped_types.insert(obj.object_type) {
                        log::debug!("Skipping BLF object type {}", obj.object_type);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blf_file_not_found() {
        let result = BlfParser::parse(Path::new("nonexistent.blf"));
        assert!(matches!(result, Err(DecoderError::LogParse(_))));
    }

    #[test]
    fn test_garbage_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".blf").tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"definitely not a BLF header").unwrap();
        assert!(BlfParser::parse(file.path()).is_err());
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(payload_len(3), 3);
        assert_eq!(payload_len(8), 8);
        assert_eq!(payload_len(9), 12);
        assert_eq!(payload_len(15), 64);
    }
}
