//! Log file frame sources
//!
//! Each source is an iterator of raw CAN frames in file order.

use crate::types::{DecoderError, RawFrame, Result};
use std::path::Path;

pub mod blf;

pub use blf::{BlfFrameIterator, BlfParser};

/// Common trait for log file frame sources
pub trait LogFileParser: Iterator<Item = Result<RawFrame>> + Sized {
    /// Open a log file and return an iterator over its frames
    fn parse(path: &Path) -> Result<Self>;
}

/// Open `path` with the parser matching its extension
pub fn open_log(path: &Path) -> Result<BlfFrameIterator> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("blf") => BlfFrameIterator::parse(path),
        other => Err(DecoderError::LogParse(format!(
            "Unsupported log format {:?} for {:?}",
            other.unwrap_or(""),
            path
        ))),
    }
}
