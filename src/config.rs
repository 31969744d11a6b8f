//! Session configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MftError, Result};

pub const DEFAULT_RECORD_SIZE: usize = 1024;

/// Bytes of decoded, in-memory state per byte of raw MFT, measured on real volumes.
pub const DEFAULT_EXPANSION_FACTOR: f64 = 4.39;

const SECTOR_SIZE: usize = 512;

/// What the session does with a record buffer that fails to decode.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorruptRecordPolicy {
    /// Index the record as having no FILE_NAME and report it per record.
    #[default]
    Skip,
    /// Fail the whole session on the first bad record.
    Abort,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub record_size: usize,
    pub path_separator: char,
    pub stream_separator: char,
    pub debug: bool,
    pub expansion_factor: f64,
    /// Upper bound on decoded state in bytes. `None` probes the allocator instead.
    pub memory_budget: Option<u64>,
    pub corrupt_records: CorruptRecordPolicy,
    /// Whether the consumer keeps every emitted record in memory (JSON array
    /// output). When false only the path index counts toward the budget.
    pub retain_records: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            record_size: DEFAULT_RECORD_SIZE,
            path_separator: '/',
            stream_separator: ':',
            debug: false,
            expansion_factor: DEFAULT_EXPANSION_FACTOR,
            memory_budget: None,
            corrupt_records: CorruptRecordPolicy::Skip,
            retain_records: true,
        }
    }
}

impl SessionConfig {
    /// Load a JSON config file; keys that are absent keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            MftError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.record_size == 0 || self.record_size % SECTOR_SIZE != 0 {
            return Err(MftError::Config(format!(
                "record_size must be a non-zero multiple of {}, got {}",
                SECTOR_SIZE, self.record_size
            )));
        }
        if !self.expansion_factor.is_finite() || self.expansion_factor <= 0.0 {
            return Err(MftError::Config(format!(
                "expansion_factor must be a positive number, got {}",
                self.expansion_factor
            )));
        }
        if self.path_separator == self.stream_separator {
            return Err(MftError::Config(format!(
                "path and stream separators must differ (both are {:?})",
                self.path_separator
            )));
        }
        Ok(())
    }

    pub fn with_path_separator(mut self, separator: char) -> Self {
        self.path_separator = separator;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_memory_budget(mut self, budget: Option<u64>) -> Self {
        self.memory_budget = budget;
        self
    }

    pub fn with_corrupt_records(mut self, policy: CorruptRecordPolicy) -> Self {
        self.corrupt_records = policy;
        self
    }

    pub fn with_retain_records(mut self, retain: bool) -> Self {
        self.retain_records = retain;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.record_size, 1024);
        assert_eq!(config.path_separator, '/');
        assert!(config.retain_records);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "path_separator": "\\", "memory_budget": 4096, "corrupt_records": "abort",
                 "retain_records": false }}"#
        )
        .unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.path_separator, '\\');
        assert_eq!(config.memory_budget, Some(4096));
        assert_eq!(config.corrupt_records, CorruptRecordPolicy::Abort);
        assert!(!config.retain_records);
        assert_eq!(config.record_size, DEFAULT_RECORD_SIZE);
        assert_eq!(config.expansion_factor, DEFAULT_EXPANSION_FACTOR);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = SessionConfig::default();
        config.record_size = 1000;
        assert!(matches!(config.validate(), Err(MftError::Config(_))));

        let mut config = SessionConfig::default();
        config.expansion_factor = 0.0;
        assert!(config.validate().is_err());

        let config = SessionConfig::default().with_path_separator(':');
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_config_file_names_path() {
        let err = SessionConfig::from_json_file("/nonexistent/mft.json").unwrap_err();
        assert!(matches!(err, MftError::Config(_)));
        let message = err.to_string();
        assert!(message.contains("config file /nonexistent/mft.json"));
        assert!(!message.contains("MFT file"));
    }
}
