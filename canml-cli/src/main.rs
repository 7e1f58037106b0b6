//! canml command-line front end
//!
//! Builds one signal registry from the given DBC files, decodes one or more
//! CAN logs against it and exports each as CSV or Parquet with a metadata
//! sidecar. All decoding lives in the canml-decoder library.

use anyhow::{bail, Context, Result};
use canml_decoder::{
    export, export_csv_stream, export_parquet_stream, DecodeStats, Decoder, ExportFormat, RegistryCache,
};
use clap::{Parser, ValueEnum};
use config::AppConfig;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;

mod config;

/// canml - Decode CAN logs into time-aligned signal tables
#[derive(Parser, Debug)]
#[command(name = "canml")]
#[command(about = "Decode CAN log files (BLF) with DBC databases into CSV or Parquet", long_about = None)]
#[command(version)]
struct Args {
    /// Log file to decode (can be repeated)
    #[arg(short, long = "log", value_name = "FILE")]
    logs: Vec<PathBuf>,

    /// DBC file (can be repeated)
    #[arg(long, value_name = "FILE")]
    dbc: Vec<PathBuf>,

    /// Output file, or output directory when several logs are given
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Output format (default: from the output extension, else csv)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Metadata JSON file, or directory when several logs are given
    #[arg(long, value_name = "PATH")]
    metadata: Option<PathBuf>,

    /// Prefix signal names with their DBC file stem
    #[arg(long)]
    prefix_signals: bool,

    /// Rows per batch
    #[arg(long, value_name = "N")]
    chunk_size: Option<usize>,

    /// Re-index timestamps at this spacing in seconds
    #[arg(long, value_name = "SECONDS")]
    uniform_interval: Option<f64>,

    /// Stable-sort rows by timestamp
    #[arg(long)]
    sort: bool,

    /// Linearly interpolate interior gaps
    #[arg(long)]
    interpolate: bool,

    /// Only keep this signal (can be repeated)
    #[arg(long = "signal", value_name = "NAME")]
    signals: Vec<String>,

    /// Only decode this arbitration id, decimal or 0x-hex (can be repeated)
    #[arg(long = "id", value_name = "ID", value_parser = parse_can_id)]
    ids: Vec<u32>,

    /// Always output this signal column (can be repeated)
    #[arg(long = "expected", value_name = "NAME")]
    expected: Vec<String>,

    /// Export batch by batch with bounded memory
    #[arg(long)]
    stream: bool,

    /// Append to existing output files
    #[arg(long)]
    append: bool,

    /// Log a progress line per batch
    #[arg(long)]
    progress: bool,

    /// Path to configuration file (canml.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Parquet,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Parquet => ExportFormat::Parquet,
        }
    }
}

fn parse_can_id(value: &str) -> std::result::Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid CAN id '{}': {}", value, e))
}

impl Args {
    /// Overlay command-line flags onto the file configuration
    fn apply_to(&self, app: &mut AppConfig) {
        app.input.files.extend(self.logs.iter().cloned());
        app.input.dbc_files.extend(self.dbc.iter().cloned());
        app.input.prefix_signals |= self.prefix_signals;

        app.decode.sort |= self.sort;
        app.decode.interpolate |= self.interpolate;
        app.decode.progress |= self.progress;
        app.decode.stream |= self.stream;
        if self.chunk_size.is_some() {
            app.decode.chunk_size = self.chunk_size;
        }
        if self.uniform_interval.is_some() {
            app.decode.uniform_interval = self.uniform_interval;
        }

        if !self.ids.is_empty() {
            app.filter.message_ids = Some(self.ids.clone());
        }
        if !self.signals.is_empty() {
            app.filter.signals = Some(self.signals.clone());
        }
        if !self.expected.is_empty() {
            app.filter.expected_signals = Some(self.expected.clone());
        }

        if self.output.is_some() {
            app.output.path = self.output.clone();
        }
        if let Some(format) = self.format {
            app.output.format = Some(format.into());
        }
        if self.metadata.is_some() {
            app.output.metadata = self.metadata.clone();
        }
        app.output.append |= self.append;
    }
}

/// Where one log's outputs go
#[derive(Debug, Clone, PartialEq)]
struct Job {
    log: PathBuf,
    output: PathBuf,
    metadata: Option<PathBuf>,
    format: ExportFormat,
}

fn extension(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Csv => "csv",
        ExportFormat::Parquet => "parquet",
    }
}

/// Resolve output paths for every log
///
/// One log: `output.path` and `output.metadata` are files. Several logs:
/// they are directories holding `<log stem>.<ext>` and `<log stem>.json`.
/// Without an output path each export lands next to its log. Two logs
/// that would write the same file (same stem in different directories)
/// are rejected, since their jobs run in parallel.
fn plan_jobs(app: &AppConfig) -> Result<Vec<Job>> {
    let logs = &app.input.files;
    let single = logs.len() == 1;

    let format = app
        .output
        .format
        .or_else(|| {
            app.output
                .path
                .as_deref()
                .filter(|_| single)
                .and_then(ExportFormat::from_path)
        })
        .unwrap_or(ExportFormat::Csv);

    let mut jobs = Vec::with_capacity(logs.len());
    let mut targets: HashMap<PathBuf, &PathBuf> = HashMap::new();
    for log in logs {
        let stem = log
            .file_stem()
            .with_context(|| format!("Log path has no file name: {:?}", log))?;
        let file_name = |ext: &str| {
            let mut name = stem.to_os_string();
            name.push(".");
            name.push(ext);
            name
        };

        let output = match (&app.output.path, single) {
            (Some(path), true) => path.clone(),
            (Some(dir), false) => dir.join(file_name(extension(format))),
            (None, _) => log.with_file_name(file_name(extension(format))),
        };
        let metadata = app.output.metadata.as_ref().map(|path| {
            if single {
                path.clone()
            } else {
                path.join(file_name("json"))
            }
        });

        for path in std::iter::once(&output).chain(metadata.as_ref()) {
            if let Some(other) = targets.insert(path.clone(), log) {
                bail!(
                    "Logs {:?} and {:?} would both write {:?}; decode them in separate runs",
                    other,
                    log,
                    path
                );
            }
        }

        jobs.push(Job {
            log: log.clone(),
            output,
            metadata,
            format,
        });
    }
    Ok(jobs)
}

fn decode_one(decoder: &Decoder, job: &Job, app: &AppConfig) -> Result<DecodeStats> {
    let append = app.output.append;
    let metadata = job.metadata.as_deref();

    if !app.decode.stream {
        let loaded = decoder
            .load_file(&job.log)
            .with_context(|| format!("Failed to decode {:?}", job.log))?;
        export(&loaded.table, job.format, &job.output, metadata, append)
            .with_context(|| format!("Failed to write {:?}", job.output))?;
        return Ok(loaded.stats);
    }

    let mut stream = decoder
        .stream_file(&job.log)
        .with_context(|| format!("Failed to open {:?}", job.log))?;
    let schema = stream.empty_table();
    let written = match job.format {
        ExportFormat::Csv => export_csv_stream(&mut stream, &schema, &job.output, metadata, append),
        ExportFormat::Parquet => export_parquet_stream(&mut stream, &schema, &job.output, metadata, append),
    };
    written.with_context(|| format!("Failed to write {:?}", job.output))?;
    Ok(stream.stats())
}

fn run(app: &AppConfig) -> Result<()> {
    if app.input.dbc_files.is_empty() {
        bail!("No DBC files given (use --dbc or [input] dbc_files)");
    }
    if app.input.files.is_empty() {
        bail!("No log files given (use --log or [input] files)");
    }

    let cache = RegistryCache::default();
    let decoder = Decoder::from_dbc_files(&app.input.dbc_files, app.decoder_config(), &cache)
        .context("Failed to build signal registry")?;

    let jobs = plan_jobs(app)?;
    let results: Vec<(&Job, Result<DecodeStats>)> = jobs
        .par_iter()
        .map(|job| (job, decode_one(&decoder, job, app)))
        .collect();

    let mut failures = 0;
    for (job, result) in results {
        match result {
            Ok(stats) => log::info!(
                "{:?} -> {:?}: {} rows, {} frames read, {} skipped ({} unknown ids, {} corrupt)",
                job.log,
                job.output,
                stats.rows_emitted,
                stats.frames_read,
                stats.skipped_frames(),
                stats.unknown_ids,
                stats.length_errors
            ),
            Err(e) => {
                log::error!("{:?}: {:#}", job.log, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} logs failed", failures, jobs.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("canml v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using decoder library v{}", canml_decoder::VERSION);

    let mut app = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };
    args.apply_to(&mut app);

    run(&app)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_logs(logs: &[&str]) -> AppConfig {
        let mut app = AppConfig::default();
        app.input.files = logs.iter().map(PathBuf::from).collect();
        app
    }

    #[test]
    fn test_parse_can_id() {
        assert_eq!(parse_can_id("0x1A0"), Ok(0x1A0));
        assert_eq!(parse_can_id("256"), Ok(256));
        assert!(parse_can_id("0xZZ").is_err());
    }

    #[test]
    fn test_args_override_file_config() {
        let args = Args::parse_from([
            "canml", "--log", "a.blf", "--dbc", "x.dbc", "--id", "0x100", "--uniform-interval", "0.05", "--sort",
        ]);
        let mut app = AppConfig::default();
        app.decode.uniform_interval = Some(0.5);
        args.apply_to(&mut app);

        assert_eq!(app.input.files, vec![PathBuf::from("a.blf")]);
        assert_eq!(app.filter.message_ids, Some(vec![0x100]));
        assert_eq!(app.decode.uniform_interval, Some(0.05));
        assert!(app.decode.sort);
    }

    #[test]
    fn test_plan_single_log() {
        let mut app = with_logs(&["logs/trace.blf"]);
        app.output.path = Some(PathBuf::from("out/result.parquet"));
        app.output.metadata = Some(PathBuf::from("out/meta.json"));

        let jobs = plan_jobs(&app).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].format, ExportFormat::Parquet);
        assert_eq!(jobs[0].output, PathBuf::from("out/result.parquet"));
        assert_eq!(jobs[0].metadata, Some(PathBuf::from("out/meta.json")));
    }

    #[test]
    fn test_plan_several_logs() {
        let mut app = with_logs(&["a/one.blf", "b/two.blf"]);
        app.output.path = Some(PathBuf::from("out"));
        app.output.metadata = Some(PathBuf::from("meta"));

        let jobs = plan_jobs(&app).unwrap();
        assert_eq!(jobs[0].output, PathBuf::from("out/one.csv"));
        assert_eq!(jobs[1].output, PathBuf::from("out/two.csv"));
        assert_eq!(jobs[1].metadata, Some(PathBuf::from("meta/two.json")));
    }

    #[test]
    fn test_plan_rejects_colliding_outputs() {
        let mut app = with_logs(&["a/run.blf", "b/run.blf"]);
        app.output.path = Some(PathBuf::from("out"));
        let err = plan_jobs(&app).unwrap_err();
        assert!(err.to_string().contains("run.csv"));

        // Same stem next to each log is fine
        app.output.path = None;
        assert_eq!(plan_jobs(&app).unwrap().len(), 2);

        // Distinct outputs but a shared metadata file
        let mut app = with_logs(&["a/one.blf", "b/two.blf"]);
        app.output.path = Some(PathBuf::from("out"));
        app.output.metadata = Some(PathBuf::from("out"));
        assert!(plan_jobs(&app).is_ok());
        app.input.files.push(PathBuf::from("c/two.blf"));
        assert!(plan_jobs(&app).is_err());
    }

    #[test]
    fn test_plan_defaults_next_to_log() {
        let jobs = plan_jobs(&with_logs(&["logs/trace.blf"])).unwrap();
        assert_eq!(jobs[0].output, PathBuf::from("logs/trace.csv"));
        assert!(jobs[0].metadata.is_none());
    }

    #[test]
    fn test_run_requires_inputs() {
        assert!(run(&AppConfig::default()).is_err());
        let mut app = AppConfig::default();
        app.input.dbc_files.push(PathBuf::from("x.dbc"));
        assert!(run(&app).is_err());
    }
}
