//! analyze_mft - NTFS $MFT path reconstruction
//!
//! Reads an extracted Master File Table and prints every record with its
//! full path, as JSON, JSON Lines, CSV or a mactime body file.

use std::env;
use std::io::{self, BufWriter};
use std::process;

use env_logger::Env;
use log::info;
use serde::Serialize;

use mft_analyzer::output::{write_records, OutputFormat};
use mft_analyzer::{CorruptRecordPolicy, MftError, MftSession, SessionConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize, Debug)]
struct ErrorReport {
    success: bool,
    error: String,
}

struct AnalyzeOptions {
    mft_path: String,
    format: OutputFormat,
    config: SessionConfig,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let debug = args.iter().any(|a| a == "--debug");
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let command = &args[1];

    let result = match command.as_str() {
        "analyze" => {
            if args.len() < 3 {
                eprintln!("Usage: analyze_mft analyze <mft_file> [options]");
                process::exit(1);
            }
            parse_analyze_options(&args[2..]).and_then(run_analyze)
        }
        "check" => {
            if args.len() < 3 {
                eprintln!(
                    "Usage: analyze_mft check <mft_file> [--format <fmt>] [--memory-budget <bytes>]"
                );
                process::exit(1);
            }
            parse_analyze_options(&args[2..]).and_then(run_check)
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        "version" | "--version" | "-v" => {
            println!("analyze_mft v{}", VERSION);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        let report = ErrorReport {
            success: false,
            error: e.to_string(),
        };
        match serde_json::to_string(&report) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("{}", e),
        }
        process::exit(1);
    }
}

fn parse_analyze_options(args: &[String]) -> Result<AnalyzeOptions, MftError> {
    let mut mft_path: Option<String> = None;
    let mut format = OutputFormat::JsonLines;
    let mut config = SessionConfig::default();
    let mut separator: Option<char> = None;
    let mut budget: Option<u64> = None;
    let mut abort_on_corrupt = false;
    let mut excel_dates = false;
    let mut debug = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => format = required_value(&mut iter, arg)?.parse()?,
            "--sep" => {
                let value = required_value(&mut iter, arg)?;
                let mut chars = value.chars();
                separator = match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => {
                        return Err(MftError::Config(format!(
                            "--sep takes a single character, got '{}'",
                            value
                        )))
                    }
                };
            }
            "--config" => config = SessionConfig::from_json_file(required_value(&mut iter, arg)?)?,
            "--memory-budget" => {
                let value = required_value(&mut iter, arg)?;
                budget = Some(value.parse().map_err(|_| {
                    MftError::Config(format!(
                        "--memory-budget expects a byte count, got '{}'",
                        value
                    ))
                })?);
            }
            "--abort-on-corrupt" => abort_on_corrupt = true,
            "--excel" => excel_dates = true,
            "--debug" => debug = true,
            flag if flag.starts_with("--") => {
                return Err(MftError::Config(format!("unknown option {}", flag)));
            }
            path => {
                if mft_path.replace(path.to_string()).is_some() {
                    return Err(MftError::Config(format!("unexpected argument '{}'", path)));
                }
            }
        }
    }

    // Command-line flags override the config file
    if let Some(separator) = separator {
        config = config.with_path_separator(separator);
    }
    if budget.is_some() {
        config = config.with_memory_budget(budget);
    }
    if abort_on_corrupt {
        config = config.with_corrupt_records(CorruptRecordPolicy::Abort);
    }
    if debug {
        config = config.with_debug(true);
    }
    if excel_dates {
        format = format.with_excel_dates();
    }
    // Only the JSON array keeps records after they are written
    config = config.with_retain_records(format.retains_records());

    let mft_path = mft_path.ok_or_else(|| MftError::Config("no MFT file given".to_string()))?;
    Ok(AnalyzeOptions {
        mft_path,
        format,
        config,
    })
}

fn required_value<'a>(
    iter: &mut std::slice::Iter<'a, String>,
    flag: &str,
) -> Result<&'a str, MftError> {
    iter.next()
        .map(|s| s.as_str())
        .ok_or_else(|| MftError::Config(format!("{} requires a value", flag)))
}

fn run_analyze(options: AnalyzeOptions) -> Result<(), MftError> {
    if options.format.retains_records() {
        info!("JSON array output keeps every record in memory until the end of the run");
    }

    let session = MftSession::open(&options.mft_path, options.config)?;
    info!(
        "Analyzing {} ({} bytes, {} records)",
        session.source(),
        session.file_size(),
        session.record_count()
    );
    let records = session.process()?;

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    let summary = write_records(records, options.format, &mut writer)?;

    info!(
        "Wrote {} records from {} ({} undecodable records skipped)",
        summary.written, options.mft_path, summary.skipped
    );
    Ok(())
}

fn run_check(options: AnalyzeOptions) -> Result<(), MftError> {
    let mut session = MftSession::open(&options.mft_path, options.config)?;
    let estimate = session.check_memory()?;
    println!("{}", serde_json::to_string(&estimate)?);
    Ok(())
}

fn print_usage() {
    eprintln!("
analyze_mft v{}
================================

COMMANDS:
  analyze <mft_file> [options]    Rebuild full paths for every MFT record
  check <mft_file> [options]      Run only the memory feasibility check
  help, --help, -h                Show this help message
  version, --version, -v          Show version information

OPTIONS:
  --format <fmt>                  json, jsonl, csv, csv-excel or bodyfile (default: jsonl)
  --excel                         Wrap CSV dates as =\"...\" for spreadsheets
  --sep <char>                    Path separator (default: /)
  --config <file.json>            Load session settings from a JSON file
  --memory-budget <bytes>         Fail early if decoding needs more than this
  --abort-on-corrupt              Stop at the first undecodable record
  --debug                         Verbose per-record logging

NOTES:
  - Input is an extracted $MFT, read as consecutive 1024-byte records
  - Records whose parents cannot be resolved are reported as Orphan,
    ORPHAN/<name> or NoFNRecord instead of failing the run
  - json output holds all records in memory and is budgeted that way;
    jsonl, csv and bodyfile stream and only the path index is budgeted
", VERSION);
}
