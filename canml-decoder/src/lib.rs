//! CAN bus-log decoding library
//!
//! Turns raw CAN frames recorded in log files into time-aligned, typed
//! tables of physical signal values, using one or more DBC databases as
//! the signal registry, and exports them as CSV or Parquet with a JSON
//! sidecar of signal metadata.
//!
//! # Architecture
//!
//! - `signals`: DBC loading, registry merging and the memoized registry cache
//! - `MessageDecoder`: one frame -> one row of physical values
//! - `stream`: chunked, bounded-memory reading of frame sources
//! - `inject`: column typing and missing-signal injection
//! - `normalize`: sorting, uniform re-indexing and interpolation
//! - `export`: CSV/Parquet writers and the metadata sidecar
//!
//! The library never reads configuration files or sets up logging; that is
//! the application layer's job (canml-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use canml_decoder::{export_csv, Decoder, DecoderConfig, RegistryCache};
//! use std::path::Path;
//!
//! let cache = RegistryCache::default();
//! let config = DecoderConfig::new()
//!     .with_sorting(true)
//!     .with_uniform_timing(0.01)
//!     .with_expected_signals(["Speed", "Brake_Active"]);
//!
//! let decoder = Decoder::from_dbc_files(&["powertrain.dbc", "body.dbc"], config, &cache).unwrap();
//! let log = decoder.load_file(Path::new("trace.blf")).unwrap();
//!
//! export_csv(&log.table, Path::new("out/trace.csv"), Some(Path::new("out/trace.json")), false).unwrap();
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod export;
pub mod formats;
pub mod inject;
pub mod metadata;
pub mod normalize;
pub mod signals;
pub mod stream;
pub mod table;
pub mod types;

mod message_decoder;

// Re-export main types for convenience
pub use config::DecoderConfig;
pub use decoder::{Decoder, LoadedLog, TableStream};
pub use export::{
    export, export_csv, export_csv_stream, export_parquet, export_parquet_stream, read_metadata,
    write_metadata, ExportFormat,
};
pub use inject::SignalInjector;
pub use message_decoder::MessageDecoder;
pub use metadata::SignalAttributes;
pub use normalize::TimestampNormalizer;
pub use signals::{DatabaseStats, RegistryCache, SignalDatabase};
pub use stream::{iter_chunks, ChunkReader, DecodeStats};
pub use table::{Column, ColumnData, ColumnKind, ResultTable, RowBatch};
pub use types::{DecodedRow, DecodedSignal, DecoderError, RawFrame, Result, SignalValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
