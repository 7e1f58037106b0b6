//! Main decoder API
//!
//! The `Decoder` ties the pipeline together: chunked reading, column typing,
//! timestamp normalization, missing-signal injection and metadata
//! attachment. It can either stream tables batch by batch or load a whole
//! log into one table.

use crate::config::DecoderConfig;
use crate::formats;
use crate::inject::SignalInjector;
use crate::metadata::{self, SignalAttributes};
use crate::normalize::TimestampNormalizer;
use crate::signals::{RegistryCache, SignalDatabase};
use crate::stream::{ChunkReader, DecodeStats};
use crate::table::ResultTable;
use crate::types::{RawFrame, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// A fully loaded log and the counters gathered while reading it
#[derive(Debug, Clone)]
pub struct LoadedLog {
    pub table: ResultTable,
    pub stats: DecodeStats,
}

/// The main decoder struct - entry point for all decoding operations
pub struct Decoder {
    registry: Arc<SignalDatabase>,
    config: DecoderConfig,
    injector: SignalInjector,
    attributes: Arc<SignalAttributes>,
}

impl Decoder {
    /// Create a decoder over an already built registry
    ///
    /// Fails with `InvalidConfig` if the configuration is inconsistent.
    pub fn new(registry: Arc<SignalDatabase>, config: DecoderConfig) -> Result<Self> {
        config.validate()?;

        let injector = SignalInjector::for_config(&registry, &config);
        let attributes = Arc::new(metadata::attributes(&registry, &injector.signal_names()));

        let stats = registry.stats();
        log::info!(
            "Decoder ready: {} messages, {} signals, {} output columns",
            stats.num_messages,
            stats.num_signals,
            injector.schema().len()
        );

        Ok(Self {
            registry,
            config,
            injector,
            attributes,
        })
    }

    /// Load (or reuse) the registry for `dbc_paths` and create a decoder
    ///
    /// `config.prefix_signals` selects the merge mode.
    pub fn from_dbc_files<P: AsRef<Path>>(
        dbc_paths: &[P],
        config: DecoderConfig,
        cache: &RegistryCache,
    ) -> Result<Self> {
        let registry = cache.load(dbc_paths, config.prefix_signals)?;
        Self::new(registry, config)
    }

    pub fn registry(&self) -> &SignalDatabase {
        &self.registry
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Output signal columns, in order
    pub fn signal_names(&self) -> Vec<&str> {
        self.injector.signal_names()
    }

    /// Signal attribute metadata attached to every produced table
    pub fn signal_attributes(&self) -> Arc<SignalAttributes> {
        self.attributes.clone()
    }

    fn reader<I>(&self, frames: I) -> ChunkReader<'_, I>
    where
        I: Iterator<Item = Result<RawFrame>>,
    {
        let id_filter: Option<HashSet<u32>> = self
            .config
            .id_filter
            .as_ref()
            .map(|ids| ids.iter().copied().collect());

        // Only the signal filter removes rows; expected signals shape columns
        let signal_filter: Option<HashSet<String>> = self
            .config
            .signal_filter
            .as_ref()
            .map(|names| names.iter().cloned().collect());
        let columns: Option<HashSet<String>> = self
            .config
            .expected_signals
            .is_some()
            .then(|| self.injector.signal_names().into_iter().map(str::to_string).collect());

        ChunkReader::new(frames, &self.registry, self.config.chunk_size, id_filter, signal_filter)
            .with_columns(columns)
            .with_progress(self.config.progress_bar)
    }

    /// Stream normalized tables of at most `chunk_size` rows
    ///
    /// Uniform timestamps continue across batches; sorting and
    /// interpolation apply within each batch.
    pub fn stream<F>(&self, frames: F) -> TableStream<'_, F::IntoIter>
    where
        F: IntoIterator<Item = Result<RawFrame>>,
    {
        TableStream {
            reader: self.reader(frames.into_iter()),
            injector: &self.injector,
            normalizer: TimestampNormalizer::from_config(&self.config),
            attributes: self.attributes.clone(),
            unlabelled: 0,
        }
    }

    /// Stream tables from a log file on disk
    pub fn stream_file(&self, path: &Path) -> Result<TableStream<'_, formats::BlfFrameIterator>> {
        Ok(self.stream(formats::open_log(path)?))
    }

    /// Decode every frame into one table
    ///
    /// Sorting, re-indexing and interpolation see the whole table.
    pub fn load_all<F>(&self, frames: F) -> Result<LoadedLog>
    where
        F: IntoIterator<Item = Result<RawFrame>>,
    {
        let mut reader = self.reader(frames.into_iter());
        let mut table = self.injector.empty_table();
        let mut unlabelled = 0;

        for batch in reader.by_ref() {
            let (mut part, count) = self.injector.materialize(&batch?);
            unlabelled += count;
            self.injector.inject(&mut part);
            table.append(&part)?;
        }

        let mut normalizer = TimestampNormalizer::from_config(&self.config);
        normalizer.apply(&mut table);
        table.attributes = self.attributes.clone();

        let mut stats = reader.stats();
        stats.unlabelled_enum_values = unlabelled;
        log_summary(&stats);

        Ok(LoadedLog { table, stats })
    }

    /// Decode a log file on disk into one table
    pub fn load_file(&self, path: &Path) -> Result<LoadedLog> {
        self.load_all(formats::open_log(path)?)
    }
}

fn log_summary(stats: &DecodeStats) {
    log::info!(
        "Decoded {} of {} frames into {} rows ({} unknown ids, {} corrupt frames, {} filtered)",
        stats.frames_decoded,
        stats.frames_read,
        stats.rows_emitted,
        stats.unknown_ids,
        stats.length_errors,
        stats.frames_filtered
    );
    if stats.unlabelled_enum_values > 0 {
        log::warn!(
            "{} enumeration values had no label and were stored as null",
            stats.unlabelled_enum_values
        );
    }
}

/// Iterator of normalized result tables over a frame source
pub struct TableStream<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    reader: ChunkReader<'a, I>,
    injector: &'a SignalInjector,
    normalizer: TimestampNormalizer,
    attributes: Arc<SignalAttributes>,
    unlabelled: u64,
}

impl<'a, I> TableStream<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    /// Counters so far
    pub fn stats(&self) -> DecodeStats {
        let mut stats = self.reader.stats();
        stats.unlabelled_enum_values = self.unlabelled;
        stats
    }

    /// Empty table with the columns and attributes every yielded table carries
    ///
    /// Exporters write it as the header or file schema, so a log with no
    /// decodable rows still produces a complete output.
    pub fn empty_table(&self) -> ResultTable {
        let mut table = self.injector.empty_table();
        if self.normalizer.reindexes() {
            table.raw_timestamp = Some(Vec::new());
        }
        table.attributes = self.attributes.clone();
        table
    }
}

impl<'a, I> Iterator for TableStream<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    type Item = Result<ResultTable>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = match self.reader.next()? {
            Ok(batch) => batch,
            Err(e) => return Some(Err(e)),
        };

        let (mut table, unlabelled) = self.injector.materialize(&batch);
        self.unlabelled += unlabelled;
        self.normalizer.apply(&mut table);
        self.injector.inject(&mut table);
        table.attributes = self.attributes.clone();

        if self.reader.is_exhausted() {
            log_summary(&self.stats());
        }
        Some(Ok(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::database::tests::signal;
    use crate::signals::{AttributeValue, MessageDefinition};
    use crate::table::ColumnData;
    use crate::types::DecoderError;

    fn registry() -> Arc<SignalDatabase> {
        let mut speed = signal("Speed", 0, 8);
        speed
            .attributes
            .insert("GenSigStartValue".into(), AttributeValue::Integer(0));
        let mut db = SignalDatabase::new();
        db.add_message(MessageDefinition::new(0x100, "Vehicle", 1, None, vec![speed], "v.dbc").unwrap())
            .unwrap();
        db.add_message(MessageDefinition::new(0x200, "Engine", 1, None, vec![signal("Rpm", 0, 8)], "v.dbc").unwrap())
            .unwrap();
        Arc::new(db)
    }

    fn frames(cases: &[(u64, u32, u8)]) -> Vec<Result<RawFrame>> {
        cases
            .iter()
            .map(|(ts_ms, id, byte)| Ok(RawFrame::new(ts_ms * 1_000_000, *id, vec![*byte])))
            .collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DecoderConfig::new().with_chunk_size(0);
        assert!(matches!(
            Decoder::new(registry(), config),
            Err(DecoderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_sorts_reindexes_and_interpolates() {
        let config = DecoderConfig::new()
            .with_sorting(true)
            .with_uniform_timing(0.01)
            .with_interpolation(true);
        let decoder = Decoder::new(registry(), config).unwrap();

        let log = decoder
            .load_all(frames(&[(20, 0x100, 30), (0, 0x100, 10), (10, 0x200, 7)]))
            .unwrap();
        let table = log.table;

        assert_eq!(table.column_names(), vec!["timestamp", "Speed", "Rpm", "raw_timestamp"]);
        assert_eq!(table.timestamp, vec![0.0, 0.01, 0.02]);
        assert_eq!(table.raw_timestamp, Some(vec![0.0, 0.01, 0.02]));
        assert_eq!(
            table.column("Speed").unwrap().data,
            ColumnData::Integer(vec![Some(10), Some(20), Some(30)])
        );
        assert_eq!(log.stats.rows_emitted, 3);
        assert!(table.attributes.contains_key("Speed"));
    }

    #[test]
    fn test_stream_continues_uniform_index() {
        let config = DecoderConfig::new().with_chunk_size(2).with_uniform_timing(0.5);
        let decoder = Decoder::new(registry(), config).unwrap();
        let input = frames(&[(0, 0x100, 1), (3, 0x100, 2), (7, 0x100, 3)]);

        let mut stream = decoder.stream(input);
        let tables: Vec<ResultTable> = stream.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].timestamp, vec![0.0, 0.5]);
        assert_eq!(tables[1].timestamp, vec![1.0]);
        let expected = stream.empty_table().column_names();
        assert_eq!(expected, vec!["timestamp", "Speed", "Rpm", "raw_timestamp"]);
        assert!(tables.iter().all(|t| t.column_names() == expected));
        assert_eq!(stream.stats().batches, 2);
    }

    #[test]
    fn test_expected_signals_shape_columns_without_dropping_rows() {
        let config = DecoderConfig::new().with_expected_signals(["Speed", "Brake_Active"]);
        let decoder = Decoder::new(registry(), config).unwrap();

        let log = decoder
            .load_all(frames(&[(0, 0x100, 1), (1, 0x200, 2), (2, 0x100, 3)]))
            .unwrap();
        assert_eq!(log.table.signal_names(), vec!["Speed", "Brake_Active"]);
        assert_eq!(log.table.len(), 3);
        assert_eq!(log.stats.rows_dropped, 0);
        assert_eq!(
            log.table.column("Speed").unwrap().data,
            ColumnData::Integer(vec![Some(1), None, Some(3)])
        );
        assert_eq!(log.table.column("Brake_Active").unwrap().data.null_count(), 3);
    }

    #[test]
    fn test_signal_filter_drops_rows_without_requested_signals() {
        let config = DecoderConfig::new().with_signal_filter(["Speed"]);
        let decoder = Decoder::new(registry(), config).unwrap();

        let log = decoder
            .load_all(frames(&[(0, 0x100, 1), (1, 0x200, 2), (2, 0x100, 3)]))
            .unwrap();
        assert_eq!(log.table.signal_names(), vec!["Speed"]);
        assert_eq!(log.table.len(), 2);
        assert_eq!(log.stats.rows_dropped, 1);
    }

    #[test]
    fn test_empty_log_has_full_schema() {
        let decoder = Decoder::new(registry(), DecoderConfig::new()).unwrap();
        let log = decoder.load_all(Vec::new()).unwrap();
        assert!(log.table.is_empty());
        assert_eq!(log.table.column_names(), vec!["timestamp", "Speed", "Rpm"]);
    }
}
