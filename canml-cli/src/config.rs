//! Configuration loading and parsing
//!
//! The optional `canml.toml` mirrors the command-line flags; flags given on
//! the command line override values from the file.

use anyhow::{Context, Result};
use canml_decoder::{DecoderConfig, ExportFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from canml.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InputConfig {
    /// Log files to decode
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub dbc_files: Vec<PathBuf>,
    #[serde(default)]
    pub prefix_signals: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DecodeConfig {
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub sort: bool,
    /// Re-index timestamps at this spacing (seconds)
    pub uniform_interval: Option<f64>,
    #[serde(default)]
    pub interpolate: bool,
    #[serde(default)]
    pub progress: bool,
    /// Export batch by batch instead of loading whole logs
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FilterConfig {
    pub message_ids: Option<Vec<u32>>,
    pub signals: Option<Vec<String>>,
    pub expected_signals: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Output file for one log, output directory for several
    pub path: Option<PathBuf>,
    pub format: Option<ExportFormat>,
    /// Metadata sidecar file for one log, directory for several
    pub metadata: Option<PathBuf>,
    #[serde(default)]
    pub append: bool,
}

impl AppConfig {
    /// Library configuration for this run
    pub fn decoder_config(&self) -> DecoderConfig {
        let mut config = DecoderConfig::new()
            .with_sorting(self.decode.sort)
            .with_interpolation(self.decode.interpolate)
            .with_progress(self.decode.progress)
            .with_prefix_signals(self.input.prefix_signals);

        if let Some(chunk_size) = self.decode.chunk_size {
            config = config.with_chunk_size(chunk_size);
        }
        if let Some(interval) = self.decode.uniform_interval {
            config = config.with_uniform_timing(interval);
        }
        if let Some(ids) = &self.filter.message_ids {
            config = config.with_id_filter(ids.iter().copied());
        }
        if let Some(signals) = &self.filter.signals {
            config = config.with_signal_filter(signals.iter().cloned());
        }
        if let Some(expected) = &self.filter.expected_signals {
            config = config.with_expected_signals(expected.iter().cloned());
        }
        config
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [input]
            files = ["trace.blf"]
            dbc_files = ["powertrain.dbc", "body.dbc"]
            prefix_signals = true

            [decode]
            chunk_size = 5000
            sort = true
            uniform_interval = 0.02

            [filter]
            message_ids = [256, 512]
            expected_signals = ["Speed", "Brake_Active"]

            [output]
            path = "out/trace.parquet"
            format = "parquet"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.input.files.len(), 1);
        assert_eq!(config.input.dbc_files.len(), 2);
        assert_eq!(config.output.format, Some(ExportFormat::Parquet));

        let decoder_config = config.decoder_config();
        assert_eq!(decoder_config.chunk_size, 5000);
        assert!(decoder_config.force_uniform_timing);
        assert_eq!(decoder_config.interval_seconds, 0.02);
        assert!(decoder_config.prefix_signals);
        assert_eq!(decoder_config.id_filter, Some([256, 512].into_iter().collect()));
        assert!(decoder_config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.decoder_config(), DecoderConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canml.toml");
        fs::write(&path, "[decode]\ninterpolate = true\n").unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.decode.interpolate);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
