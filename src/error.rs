use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MftError {
    #[error("Unable to open MFT file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Record {record} failed to decode: {reason}")]
    CorruptRecord { record: u64, reason: String },

    #[error("Processing {path} needs an estimated {estimated} bytes, more than {limit}. {advice}")]
    ResourceExhaustion {
        path: String,
        estimated: u64,
        limit: String,
        /// What the caller can change to make the session fit.
        advice: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl MftError {
    pub fn corrupt(record: u64, reason: impl Into<String>) -> Self {
        MftError::CorruptRecord {
            record,
            reason: reason.into(),
        }
    }

    /// True for errors that concern a single record rather than the session.
    pub fn is_per_record(&self) -> bool {
        matches!(self, MftError::CorruptRecord { .. })
    }
}

pub type Result<T> = std::result::Result<T, MftError>;
