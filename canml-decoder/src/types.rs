//! Core types for the CAN log decoder library
//!
//! Raw frames come in from a frame source, decoded rows come out of the
//! message decoder. Both are transient: the chunked reader folds rows into
//! batches and the batches into tables.

use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Mask applied to arbitration ids; bit 31 flags extended frames in both DBC and BLF.
pub const CAN_ID_MASK: u32 = 0x1FFF_FFFF;

/// Raw CAN frame from a log file
///
/// This represents a single CAN frame as read from the log file,
/// before any signal decoding or message interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Timestamp in nanoseconds relative to the start of the measurement
    pub timestamp_ns: u64,
    /// CAN channel number (e.g., 0, 1, 2...)
    pub channel: u8,
    /// Arbitration id (11-bit or 29-bit)
    pub can_id: u32,
    /// Frame data bytes (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Build a frame on channel 0
    pub fn new(timestamp_ns: u64, can_id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp_ns,
            channel: 0,
            can_id,
            data: data.into(),
        }
    }

    /// Timestamp in float seconds
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ns as f64 / 1_000_000_000.0
    }

    /// Arbitration id with the extended-frame flag stripped
    pub fn arbitration_id(&self) -> u32 {
        self.can_id & CAN_ID_MASK
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// Errors that can occur while building registries, decoding and exporting
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Invalid signal definition: {0}")]
    Definition(String),

    #[error("Duplicate signal names: {names:?}; use prefix_signals to disambiguate")]
    Collision { names: Vec<String> },

    #[error("Frame 0x{can_id:X} carries {actual} bytes but its message declares {expected}")]
    FrameLength {
        can_id: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Message not found: CAN ID 0x{0:X}")]
    UnknownMessage(u32),

    #[error("Schema mismatch: output has columns {existing:?}, table has {incoming:?}")]
    SchemaMismatch {
        existing: Vec<String>,
        incoming: Vec<String>,
    },

    #[error("Failed to parse log file: {0}")]
    LogParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl DecoderError {
    /// True for per-frame data errors that are skipped and counted, never fatal
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            DecoderError::FrameLength { .. } | DecoderError::UnknownMessage(_)
        )
    }
}

/// A decoded signal value
///
/// Nulls are never represented here; a signal that was not decoded is
/// simply absent from its row.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    /// Unscaled or integrally scaled value
    Integer(i64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
    /// Enumeration label substituted from the signal's value table
    Label(String),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{}", v),
            SignalValue::Label(v) => f.write_str(v),
        }
    }
}

impl SignalValue {
    /// Numeric view of the value; labels have none
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Integer(v) => Some(*v as f64),
            SignalValue::Float(v) => Some(*v),
            SignalValue::Label(_) => None,
        }
    }

    /// Integer view of the value, rounding floats to nearest
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Integer(v) => Some(*v),
            SignalValue::Float(v) => Some(v.round() as i64),
            SignalValue::Label(_) => None,
        }
    }

    /// Label view of the value
    pub fn as_label(&self) -> Option<&str> {
        match self {
            SignalValue::Label(v) => Some(v),
            _ => None,
        }
    }
}

/// A decoded signal with its current value
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    /// Signal name from the registry (prefixed if prefixing was requested)
    pub name: String,
    /// Physical value, or the enumeration label
    pub value: SignalValue,
    /// Raw value before scaling (useful for debugging)
    pub raw_value: i64,
}

/// One decoded frame: the signals it carried plus its timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    /// Source timestamp in seconds
    pub timestamp: f64,
    /// Arbitration id of the frame the row came from
    pub can_id: u32,
    /// Active multiplexor value, if the message is multiplexed
    pub multiplexer_value: Option<u64>,
    /// Decoded signals in definition order
    pub signals: Vec<DecodedSignal>,
}

impl DecodedRow {
    /// Look up a signal's value by name
    pub fn get(&self, name: &str) -> Option<&SignalValue> {
        self.signals.iter().find(|s| s.name == name).map(|s| &s.value)
    }

    /// Drop every signal the predicate rejects
    pub fn retain_signals(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.signals.retain(|s| keep(&s.name));
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}
