//! MFT Analyzer
//!
//! Rebuilds the full directory tree of an NTFS volume from an extracted
//! $MFT: every record is decoded, placed under its parent directory, and
//! emitted with its absolute path. Corrupt, orphaned and self-referencing
//! records are reported inline rather than aborting the run.

pub mod bitparse;
pub mod config;
pub mod error;
pub mod index;
pub mod memory;
pub mod ntfs_parser;
pub mod output;
pub mod resolver;
pub mod session;

pub use config::{CorruptRecordPolicy, SessionConfig};
pub use error::{MftError, Result};
pub use ntfs_parser::{MftRecord, NtfsRecordDecoder, RecordDecoder};
pub use session::{MftSession, RecordStream, ResolvedRecord};
