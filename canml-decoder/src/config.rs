//! Decoder configuration types
//!
//! Every option recognised by the decode pipeline. The library never reads
//! configuration files itself; the CLI layer deserializes this struct from
//! TOML and overrides it from command-line flags.

use crate::table::{RAW_TIMESTAMP_COLUMN, TIMESTAMP_COLUMN};
use crate::types::{DecoderError, Result, CAN_ID_MASK};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Configuration for one decode run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Rows per streamed batch
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Log a progress line per batch (presentation only)
    #[serde(default)]
    pub progress_bar: bool,

    /// Stable-sort rows by source timestamp
    #[serde(default)]
    pub sort_timestamps: bool,

    /// Re-index `timestamp` as `row_index * interval_seconds`
    #[serde(default)]
    pub force_uniform_timing: bool,

    /// Spacing used by uniform timing
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,

    /// Linearly interpolate interior nulls in numeric columns
    #[serde(default)]
    pub interpolate_missing: bool,

    /// Optional: only decode these arbitration ids
    #[serde(default)]
    pub id_filter: Option<BTreeSet<u32>>,

    /// Optional: only keep these signals
    #[serde(default)]
    pub signal_filter: Option<BTreeSet<String>>,

    /// Optional: exact output signal columns, injected if never observed
    #[serde(default)]
    pub expected_signals: Option<Vec<String>>,

    /// Rename signals `<dbc stem>_<signal>` when merging databases
    #[serde(default)]
    pub prefix_signals: bool,
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_interval_seconds() -> f64 {
    0.01
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            progress_bar: false,
            sort_timestamps: false,
            force_uniform_timing: false,
            interval_seconds: default_interval_seconds(),
            interpolate_missing: false,
            id_filter: None,
            signal_filter: None,
            expected_signals: None,
            prefix_signals: false,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: rows per batch
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Builder method: per-batch progress logging
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress_bar = enabled;
        self
    }

    /// Builder method: stable sort by source timestamp
    pub fn with_sorting(mut self, enabled: bool) -> Self {
        self.sort_timestamps = enabled;
        self
    }

    /// Builder method: re-index timestamps at a fixed interval
    pub fn with_uniform_timing(mut self, interval_seconds: f64) -> Self {
        self.force_uniform_timing = true;
        self.interval_seconds = interval_seconds;
        self
    }

    /// Builder method: interpolate interior nulls
    pub fn with_interpolation(mut self, enabled: bool) -> Self {
        self.interpolate_missing = enabled;
        self
    }

    /// Builder method: set arbitration id filter
    pub fn with_id_filter(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.id_filter = Some(ids.into_iter().map(|id| id & CAN_ID_MASK).collect());
        self
    }

    /// Builder method: set signal filter
    pub fn with_signal_filter<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.signal_filter = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Builder method: set expected output signals
    pub fn with_expected_signals<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.expected_signals = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Builder method: prefix signal names with their DBC stem
    pub fn with_prefix_signals(mut self, enabled: bool) -> Self {
        self.prefix_signals = enabled;
        self
    }

    /// Reject option combinations the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(DecoderError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if !(self.interval_seconds.is_finite() && self.interval_seconds > 0.0) {
            return Err(DecoderError::InvalidConfig(format!(
                "interval_seconds must be positive, got {}",
                self.interval_seconds
            )));
        }
        if let Some(expected) = &self.expected_signals {
            let mut seen = HashSet::new();
            let dupes: BTreeSet<&str> = expected
                .iter()
                .filter(|name| !seen.insert(name.as_str()))
                .map(String::as_str)
                .collect();
            if !dupes.is_empty() {
                return Err(DecoderError::InvalidConfig(format!(
                    "Duplicate names in expected_signals: {:?}",
                    dupes
                )));
            }
            if let Some(reserved) = expected
                .iter()
                .find(|name| name.as_str() == TIMESTAMP_COLUMN || name.as_str() == RAW_TIMESTAMP_COLUMN)
            {
                return Err(DecoderError::InvalidConfig(format!(
                    "'{}' is a reserved column name",
                    reserved
                )));
            }
        }
        if self.id_filter.as_ref().is_some_and(|ids| ids.is_empty()) {
            log::warn!("Empty id_filter provided; no messages will be decoded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_config_builder() {
        let config = DecoderConfig::new()
            .with_chunk_size(500)
            .with_uniform_timing(0.02)
            .with_sorting(true)
            .with_id_filter(vec![0x100, 0x8000_0200])
            .with_signal_filter(["Speed"])
            .with_expected_signals(["Speed", "Brake_Active"]);

        assert_eq!(config.chunk_size, 500);
        assert!(config.force_uniform_timing);
        assert_eq!(config.interval_seconds, 0.02);
        assert!(config.sort_timestamps);
        assert_eq!(config.id_filter, Some(BTreeSet::from([0x100, 0x200])));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_filters() {
        let config = DecoderConfig::new();
        assert!(config.id_filter.is_none());
        assert!(config.signal_filter.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let zero_chunk = DecoderConfig::new().with_chunk_size(0);
        assert!(matches!(zero_chunk.validate(), Err(DecoderError::InvalidConfig(_))));

        let bad_interval = DecoderConfig::new().with_uniform_timing(0.0);
        assert!(matches!(bad_interval.validate(), Err(DecoderError::InvalidConfig(_))));

        let dupes = DecoderConfig::new().with_expected_signals(["A", "B", "A"]);
        assert!(matches!(dupes.validate(), Err(DecoderError::InvalidConfig(_))));

        let reserved = DecoderConfig::new().with_expected_signals(["Speed", "timestamp"]);
        assert!(matches!(reserved.validate(), Err(DecoderError::InvalidConfig(_))));
    }

    #[test]
    fn test_serde_defaults() {
        let config: DecoderConfig = serde_json::from_str(r#"{"sort_timestamps": true}"#).unwrap();
        assert_eq!(config.chunk_size, 10_000);
        assert_eq!(config.interval_seconds, 0.01);
        assert!(config.sort_timestamps);
        assert!(config.expected_signals.is_none());
    }
}
