//! Standalone frame dump tool
//!
//! Decodes a BLF log frame by frame against one or more DBC files and
//! prints the decoded rows, then a per-message frequency summary.
//!
//! Usage:
//!   decode_log <log_file.blf> --dbc <file.dbc> [--dbc <file.dbc>] [--limit <count>]

use canml_decoder::formats::BlfParser;
use canml_decoder::{DecoderError, MessageDecoder, SignalDatabase};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let mut log_path: Option<PathBuf> = None;
    let mut dbc_paths = Vec::new();
    let mut limit = usize::MAX;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dbc" => dbc_paths.extend(args.next().map(PathBuf::from)),
            "--limit" => limit = args.next().and_then(|v| v.parse().ok()).unwrap_or(limit),
            _ => log_path = Some(PathBuf::from(arg)),
        }
    }

    let (Some(log_path), false) = (log_path, dbc_paths.is_empty()) else {
        eprintln!("Usage: decode_log <log_file.blf> --dbc <file.dbc> [--limit <count>]");
        std::process::exit(1);
    };

    let registry = match SignalDatabase::load(&dbc_paths[..], false) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error loading DBC files: {}", e);
            std::process::exit(1);
        }
    };
    let frames = match BlfParser::parse(&log_path) {
        Ok(frames) => frames,
        Err(e) => {
            eprintln!("Error opening log: {}", e);
            std::process::exit(1);
        }
    };

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut unknown = 0usize;

    for frame in frames.take(limit) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("Frame error: {}", e);
                break;
            }
        };
        match MessageDecoder::decode(&frame, &registry) {
            Ok(row) => {
                let name = registry
                    .lookup(row.can_id)
                    .map(|m| m.name.clone())
                    .unwrap_or_default();
                let values: Vec<String> = row
                    .signals
                    .iter()
                    .map(|s| format!("{}={}", s.name, s.value))
                    .collect();
                println!("[{:.6}s] 0x{:03X} {} {}", row.timestamp, row.can_id, name, values.join(" "));
                *counts.entry(name).or_default() += 1;
            }
            Err(DecoderError::UnknownMessage(_)) => unknown += 1,
            Err(e) => eprintln!("Skipping frame: {}", e),
        }
    }

    println!("\n=== DECODING SUMMARY ===");
    println!("Unknown frames: {}", unknown);
    for (name, count) in &counts {
        println!("  {}: {}", name, count);
    }
}
