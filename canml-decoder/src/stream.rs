//! Chunked stream reader
//!
//! Pulls raw frames from a frame source, filters and decodes them, and
//! groups the resulting rows into batches of at most `chunk_size` rows.
//! Memory stays bounded by one batch regardless of log size.
//!
//! Batches are yielded strictly in source frame order. The reader is
//! single-pass: once it reports exhaustion it never yields again.

use crate::message_decoder::MessageDecoder;
use crate::signals::SignalDatabase;
use crate::table::RowBatch;
use crate::types::{DecoderError, RawFrame, Result, CAN_ID_MASK};
use std::collections::HashSet;

/// Counters accumulated while reading a log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Frames pulled from the source
    pub frames_read: u64,
    /// Frames rejected by the id filter before decoding
    pub frames_filtered: u64,
    /// Frames decoded successfully
    pub frames_decoded: u64,
    /// Frames skipped because the registry does not know their id
    pub unknown_ids: u64,
    /// Frames skipped because their payload was too short
    pub length_errors: u64,
    /// Rows handed out in batches
    pub rows_emitted: u64,
    /// Decoded rows dropped because no requested signal remained
    pub rows_dropped: u64,
    /// Enumeration values with no label in the signal's category set
    pub unlabelled_enum_values: u64,
    /// Batches yielded
    pub batches: u64,
}

impl DecodeStats {
    /// Frames skipped for per-frame data errors
    pub fn skipped_frames(&self) -> u64 {
        self.unknown_ids + self.length_errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Active,
    Exhausted,
}

/// Pull-based cursor over decoded row batches
pub struct ChunkReader<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    frames: I,
    registry: &'a SignalDatabase,
    chunk_size: usize,
    id_filter: Option<HashSet<u32>>,
    signal_filter: Option<HashSet<String>>,
    columns: Option<HashSet<String>>,
    progress: bool,
    state: ReaderState,
    pending_error: Option<DecoderError>,
    stats: DecodeStats,
}

/// Start reading `frames` in batches of `chunk_size` rows
///
/// `id_filter` is applied before decoding, `signal_filter` after. A row
/// left with none of the filtered signals is dropped.
pub fn iter_chunks<'a, F>(
    frames: F,
    registry: &'a SignalDatabase,
    chunk_size: usize,
    id_filter: Option<HashSet<u32>>,
    signal_filter: Option<HashSet<String>>,
) -> ChunkReader<'a, F::IntoIter>
where
    F: IntoIterator<Item = Result<RawFrame>>,
{
    ChunkReader::new(frames.into_iter(), registry, chunk_size, id_filter, signal_filter)
}

impl<'a, I> ChunkReader<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    pub fn new(
        frames: I,
        registry: &'a SignalDatabase,
        chunk_size: usize,
        id_filter: Option<HashSet<u32>>,
        signal_filter: Option<HashSet<String>>,
    ) -> Self {
        Self {
            frames,
            registry,
            chunk_size: chunk_size.max(1),
            id_filter: id_filter.map(|ids| ids.into_iter().map(|id| id & CAN_ID_MASK).collect()),
            signal_filter,
            columns: None,
            progress: false,
            state: ReaderState::Active,
            pending_error: None,
            stats: DecodeStats::default(),
        }
    }

    /// Log a progress line per batch
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Keep only these signal values in each row
    ///
    /// Unlike `signal_filter` this never drops a row: a row with none of the
    /// columns still carries its timestamp.
    pub fn with_columns(mut self, columns: Option<HashSet<String>>) -> Self {
        self.columns = columns;
        self
    }

    /// Counters so far
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == ReaderState::Exhausted
    }

    fn accepts_id(&self, can_id: u32) -> bool {
        self.id_filter
            .as_ref()
            .map_or(true, |ids| ids.contains(&(can_id & CAN_ID_MASK)))
    }

    fn fill_batch(&mut self) -> Result<RowBatch> {
        let mut batch = RowBatch::with_capacity(self.chunk_size);

        while batch.len() < self.chunk_size {
            let frame = match self.frames.next() {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.state = ReaderState::Exhausted;
                    if batch.is_empty() {
                        return Err(e);
                    }
                    self.pending_error = Some(e);
                    break;
                }
                None => {
                    self.state = ReaderState::Exhausted;
                    break;
                }
            };
            self.stats.frames_read += 1;

            if !self.accepts_id(frame.can_id) {
                self.stats.frames_filtered += 1;
                continue;
            }

            let mut row = match MessageDecoder::decode(&frame, self.registry) {
                Ok(row) => row,
                Err(DecoderError::UnknownMessage(id)) => {
                    log::trace!("Skipping unknown CAN ID 0x{:X}", id);
                    self.stats.unknown_ids += 1;
                    continue;
                }
                Err(e @ DecoderError::FrameLength { .. }) => {
                    log::debug!("Skipping corrupt frame: {}", e);
                    self.stats.length_errors += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.stats.frames_decoded += 1;

            if let Some(filter) = &self.signal_filter {
                row.retain_signals(|name| filter.contains(name));
                if row.is_empty() {
                    self.stats.rows_dropped += 1;
                    continue;
                }
            }
            if let Some(columns) = &self.columns {
                row.retain_signals(|name| columns.contains(name));
            }

            batch.push(row);
        }

        Ok(batch)
    }
}

impl<'a, I> Iterator for ChunkReader<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }
        if self.state == ReaderState::Exhausted {
            return None;
        }

        match self.fill_batch() {
            Ok(batch) if batch.is_empty() => {
                // Only reachable once the source is drained
                self.state = ReaderState::Exhausted;
                None
            }
            Ok(batch) => {
                self.stats.batches += 1;
                self.stats.rows_emitted += batch.len() as u64;
                if self.progress {
                    log::info!(
                        "batch {}: {} frames read, {} rows emitted, {} frames skipped",
                        self.stats.batches,
                        self.stats.frames_read,
                        self.stats.rows_emitted,
                        self.stats.skipped_frames()
                    );
                } else {
                    log::debug!("Batch {} with {} rows", self.stats.batches, batch.len());
                }
                Some(Ok(batch))
            }
            Err(e) => {
                self.state = ReaderState::Exhausted;
                Some(Err(e))
            }
        }
    }
}
