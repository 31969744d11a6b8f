//! Output formats for resolved records

use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{MftError, Result};
use crate::ntfs_parser::FileNameAttribute;
use crate::session::ResolvedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON array; every record is held in memory until the end.
    Json,
    JsonLines,
    /// One header row, then one row per record. `excel_dates` wraps every
    /// timestamp as `="..."` so spreadsheets keep it as text.
    Csv { excel_dates: bool },
    /// mactime body file
    Bodyfile,
}

impl OutputFormat {
    /// Whether the format keeps every record in memory before writing.
    pub fn retains_records(self) -> bool {
        matches!(self, OutputFormat::Json)
    }

    /// Switch CSV output to spreadsheet-safe dates; other formats are unchanged.
    pub fn with_excel_dates(self) -> Self {
        match self {
            OutputFormat::Csv { .. } => OutputFormat::Csv { excel_dates: true },
            other => other,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = MftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "json-lines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv { excel_dates: false }),
            "csv-excel" => Ok(OutputFormat::Csv { excel_dates: true }),
            "bodyfile" | "body" => Ok(OutputFormat::Bodyfile),
            other => Err(MftError::Config(format!(
                "unknown output format '{}' (expected json, jsonl, csv, csv-excel or bodyfile)",
                other
            ))),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputSummary {
    pub written: u64,
    /// Records that failed to decode and were left out.
    pub skipped: u64,
}

/// Write every record from `records` in `format`.
///
/// Per-record decode failures are counted and skipped; any other error stops
/// the write and is returned.
pub fn write_records<I, W>(
    records: I,
    format: OutputFormat,
    writer: &mut W,
) -> Result<OutputSummary>
where
    I: IntoIterator<Item = Result<ResolvedRecord>>,
    W: Write,
{
    let mut skipped = 0u64;
    let mut written = 0u64;
    let decoded = records.into_iter().filter_map(|item| match item {
        Err(e) if e.is_per_record() => {
            skipped += 1;
            None
        }
        other => Some(other),
    });

    match format {
        OutputFormat::Json => {
            let retained = decoded.collect::<Result<Vec<ResolvedRecord>>>()?;
            written = retained.len() as u64;
            serde_json::to_writer_pretty(&mut *writer, &retained)?;
            writeln!(writer)?;
        }
        OutputFormat::JsonLines => {
            for record in decoded {
                serde_json::to_writer(&mut *writer, &record?)?;
                writeln!(writer)?;
                written += 1;
            }
        }
        OutputFormat::Csv { excel_dates } => {
            let mut csv_writer = csv::Writer::from_writer(&mut *writer);
            for record in decoded {
                csv_writer.serialize(CsvRow::new(&record?, excel_dates))?;
                written += 1;
            }
            csv_writer.flush()?;
        }
        OutputFormat::Bodyfile => {
            for record in decoded {
                writeln!(writer, "{}", bodyfile_line(&record?))?;
                written += 1;
            }
        }
    }

    writer.flush()?;
    Ok(OutputSummary { written, skipped })
}

/// One CSV row. Field order is the column order of the header.
#[derive(Serialize, Debug)]
struct CsvRow<'a> {
    record_number: u64,
    sequence: u16,
    filename: &'a str,
    stream: &'a str,
    in_use: bool,
    directory: bool,
    torn_write: bool,
    file_name_count: usize,
    ads_count: usize,
    data_size: u64,
    data_resident: Option<bool>,
    si_created: String,
    si_modified: String,
    si_mft_modified: String,
    si_accessed: String,
    fn_created: String,
    fn_modified: String,
    fn_mft_modified: String,
    fn_accessed: String,
}

impl<'a> CsvRow<'a> {
    fn new(resolved: &'a ResolvedRecord, excel_dates: bool) -> Self {
        let record = &resolved.record;
        let si = record.standard_information.as_ref();
        let fn_attr: Option<&FileNameAttribute> = record.file_names.first();
        let date = |time: Option<DateTime<Utc>>| csv_date(time, excel_dates);

        CsvRow {
            record_number: record.record_number,
            sequence: record.sequence,
            filename: &resolved.filename,
            stream: resolved.stream.as_deref().unwrap_or(""),
            in_use: record.is_in_use,
            directory: record.is_directory,
            torn_write: record.torn_write,
            file_name_count: record.file_name_count(),
            ads_count: record.ads_count(),
            data_size: record.data_size,
            data_resident: record.data_resident,
            si_created: date(si.and_then(|s| s.created)),
            si_modified: date(si.and_then(|s| s.modified)),
            si_mft_modified: date(si.and_then(|s| s.mft_modified)),
            si_accessed: date(si.and_then(|s| s.accessed)),
            fn_created: date(fn_attr.and_then(|f| f.created)),
            fn_modified: date(fn_attr.and_then(|f| f.modified)),
            fn_mft_modified: date(fn_attr.and_then(|f| f.mft_modified)),
            fn_accessed: date(fn_attr.and_then(|f| f.accessed)),
        }
    }
}

/// RFC 3339 in UTC, empty when absent.
fn csv_date(time: Option<DateTime<Utc>>, excel: bool) -> String {
    match time {
        Some(t) => {
            let text = t.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            if excel {
                format!("=\"{}\"", text)
            } else {
                text
            }
        }
        None => String::new(),
    }
}

/// `MD5|name|inode|mode|UID|GID|size|atime|mtime|ctime|crtime`, using the
/// STANDARD_INFORMATION timestamps.
pub fn bodyfile_line(resolved: &ResolvedRecord) -> String {
    let record = &resolved.record;
    let si = record.standard_information.as_ref();
    let mode = if record.is_directory {
        "d/drwxrwxrwx"
    } else {
        "r/rrwxrwxrwx"
    };

    format!(
        "0|{}|{}-{}|{}|0|0|{}|{}|{}|{}|{}",
        resolved.filename,
        record.record_number,
        record.sequence,
        mode,
        record.data_size,
        unix_seconds(si.and_then(|s| s.accessed)),
        unix_seconds(si.and_then(|s| s.modified)),
        unix_seconds(si.and_then(|s| s.mft_modified)),
        unix_seconds(si.and_then(|s| s.created)),
    )
}

fn unix_seconds(time: Option<DateTime<Utc>>) -> i64 {
    time.map(|t| t.timestamp()).unwrap_or(0)
}
