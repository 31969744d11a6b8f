//! MFT Session
//! Streams an extracted $MFT twice: once to index every record and resolve
//! its path, once to emit fully decoded records with those paths attached.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{CorruptRecordPolicy, SessionConfig};
use crate::error::{MftError, Result};
use crate::index::{IndexEntry, IndexTable};
use crate::memory::{check_feasibility, MemoryEstimate};
use crate::ntfs_parser::{MftRecord, NtfsRecordDecoder, RecordDecoder};
use crate::resolver::{PathResolver, ResolutionStats};

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub records_indexed: u64,
    pub decode_failures: u64,
    /// Trailing bytes after the last complete record, ignored.
    pub residual_bytes: u64,
    pub resolution: ResolutionStats,
}

/// A decoded record with its absolute path. Records with alternate data
/// streams are emitted once as-is and once per stream, with `stream` set.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(flatten)]
    pub record: MftRecord,
}

/// One processing session over one MFT file
pub struct MftSession<R, D = NtfsRecordDecoder> {
    reader: R,
    source: String,
    file_size: u64,
    config: SessionConfig,
    decoder: D,
    index: IndexTable,
    stats: SessionStats,
    memory: Option<MemoryEstimate>,
    indexed: bool,
}

impl MftSession<BufReader<File>, NtfsRecordDecoder> {
    /// Open an extracted $MFT for reading
    pub fn open(path: impl AsRef<Path>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let open_err = |e: io::Error| MftError::Open {
            path: path.display().to_string(),
            source: e,
        };

        let file = File::open(path).map_err(open_err)?;
        let metadata = file.metadata().map_err(open_err)?;
        if metadata.is_dir() {
            return Err(open_err(io::Error::new(ErrorKind::Other, "is a directory")));
        }

        Ok(MftSession::with_parts(
            BufReader::new(file),
            path.display().to_string(),
            metadata.len(),
            config,
            NtfsRecordDecoder,
        ))
    }
}

impl<R: Read + Seek, D: RecordDecoder> MftSession<R, D> {
    /// Wrap any seekable byte source; `label` names it in errors and logs.
    pub fn from_reader(
        mut reader: R,
        label: impl Into<String>,
        config: SessionConfig,
        decoder: D,
    ) -> Result<Self> {
        config.validate()?;
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(MftSession::with_parts(reader, label.into(), file_size, config, decoder))
    }

    fn with_parts(
        reader: R,
        source: String,
        file_size: u64,
        config: SessionConfig,
        decoder: D,
    ) -> Self {
        MftSession {
            reader,
            source,
            file_size,
            config,
            decoder,
            index: IndexTable::new(),
            stats: SessionStats::default(),
            memory: None,
            indexed: false,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of complete records in the input.
    pub fn record_count(&self) -> u64 {
        self.file_size / self.config.record_size as u64
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn index(&self) -> &IndexTable {
        &self.index
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Estimate the decoded footprint and fail if it cannot fit.
    /// Runs at most once per session and never touches the stream.
    pub fn check_memory(&mut self) -> Result<MemoryEstimate> {
        if let Some(estimate) = &self.memory {
            return Ok(estimate.clone());
        }
        let estimate = check_feasibility(&self.source, self.file_size, &self.config)?;
        info!(
            "Memory check for {}: {} bytes of MFT, ~{} bytes decoded",
            self.source, estimate.file_size, estimate.estimated_bytes
        );
        self.memory = Some(estimate.clone());
        Ok(estimate)
    }

    /// Index pass: one entry per record, then resolve every path.
    pub fn build_index(&mut self) -> Result<()> {
        self.check_memory()?;
        let start = Instant::now();

        self.reader.seek(SeekFrom::Start(0))?;
        let capacity = usize::try_from(self.record_count()).unwrap_or(0);
        let mut table = IndexTable::with_capacity(capacity);
        let mut buffer = vec![0u8; self.config.record_size];
        let mut record_number: u64 = 0;
        let mut decode_failures: u64 = 0;
        let skip_corrupt = self.config.corrupt_records == CorruptRecordPolicy::Skip;

        let residual = loop {
            let filled = read_record(&mut self.reader, &mut buffer)?;
            if filled < buffer.len() {
                break filled as u64;
            }

            let entry = match self.decoder.decode(&buffer, record_number, self.config.debug) {
                Ok(record) => {
                    if self.config.debug && record.is_extension() {
                        debug!(
                            "Record {} is an extension of base record {}",
                            record_number, record.base_reference
                        );
                    }
                    IndexEntry::from_record(&record)
                }
                Err(e) if e.is_per_record() && skip_corrupt => {
                    warn!("Skipping record {} of {}: {}", record_number, self.source, e);
                    decode_failures += 1;
                    IndexEntry::default()
                }
                Err(e) => return Err(e),
            };
            table.push(entry);
            record_number += 1;
        };

        if residual > 0 {
            info!("Ignoring {} trailing bytes after record {}", residual, record_number);
        }

        let resolution = PathResolver::new(&mut table, self.config.path_separator)
            .with_debug(self.config.debug)
            .resolve_all();

        info!(
            "Indexed {} records from {} in {:.2}s ({} undecodable, {} orphaned, {} self-referential, {} cycles, {} without FILE_NAME)",
            record_number,
            self.source,
            start.elapsed().as_secs_f64(),
            decode_failures,
            resolution.missing_parent,
            resolution.self_referential,
            resolution.cycles,
            resolution.no_file_name
        );

        self.index = table;
        self.stats = SessionStats {
            records_indexed: record_number,
            decode_failures,
            residual_bytes: residual,
            resolution,
        };
        self.indexed = true;
        Ok(())
    }

    /// Run the memory check and index pass, then hand back the emission pass
    /// as a forward-only stream of resolved records.
    pub fn process(mut self) -> Result<RecordStream<R, D>> {
        if !self.indexed {
            self.build_index()?;
        }
        self.reader.seek(SeekFrom::Start(0))?;

        Ok(RecordStream {
            buffer: vec![0u8; self.config.record_size],
            reader: self.reader,
            decoder: self.decoder,
            index: self.index,
            config: self.config,
            stats: self.stats,
            record_number: 0,
            pending: VecDeque::new(),
            finished: false,
        })
    }
}

/// Emission pass over a session. Each step reads exactly one record.
pub struct RecordStream<R, D = NtfsRecordDecoder> {
    reader: R,
    decoder: D,
    index: IndexTable,
    config: SessionConfig,
    stats: SessionStats,
    buffer: Vec<u8>,
    record_number: u64,
    pending: VecDeque<ResolvedRecord>,
    finished: bool,
}

impl<R, D> RecordStream<R, D> {
    pub fn index(&self) -> &IndexTable {
        &self.index
    }

    /// Statistics gathered by the index pass.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}

impl<R: Read, D: RecordDecoder> RecordStream<R, D> {
    fn emit(&mut self, record: MftRecord, filename: String) -> ResolvedRecord {
        for stream_name in &record.ads_names {
            self.pending.push_back(ResolvedRecord {
                filename: format!("{}{}{}", filename, self.config.stream_separator, stream_name),
                stream: Some(stream_name.clone()),
                record: record.clone(),
            });
        }
        ResolvedRecord {
            filename,
            stream: None,
            record,
        }
    }
}

impl<R: Read, D: RecordDecoder> Iterator for RecordStream<R, D> {
    type Item = Result<ResolvedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(variant) = self.pending.pop_front() {
            return Some(Ok(variant));
        }
        if self.finished {
            return None;
        }

        let record_number = self.record_number;
        let filename = match self.index.filename(record_number) {
            Some(filename) => filename.to_string(),
            None => {
                self.finished = true;
                return None;
            }
        };

        match read_record(&mut self.reader, &mut self.buffer) {
            Ok(filled) if filled == self.buffer.len() => {}
            Ok(_) => {
                self.finished = true;
                return None;
            }
            Err(e) => {
                self.finished = true;
                return Some(Err(e.into()));
            }
        }
        self.record_number += 1;

        match self.decoder.decode(&self.buffer, record_number, self.config.debug) {
            Ok(record) => Some(Ok(self.emit(record, filename))),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Fill `buffer` from the stream, returning how many bytes were read.
/// Fewer than `buffer.len()` means the stream ended.
fn read_record<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
