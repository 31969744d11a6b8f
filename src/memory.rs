//! Pre-flight memory feasibility check
//!
//! The index table is held in memory for the whole session, so a volume that
//! cannot fit must be rejected before the first record is read rather than
//! half way through a multi-gigabyte stream.

use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::{MftError, Result};

/// Resident bytes per index entry: the entry plus its name and path strings.
pub const INDEX_BYTES_PER_RECORD: u64 = 256;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MemoryEstimate {
    pub file_size: u64,
    pub expansion_factor: f64,
    /// Whether the estimate covers every decoded record or only the index.
    pub retain_records: bool,
    pub estimated_bytes: u64,
    /// Configured budget, or `None` when the allocator probe was used.
    pub budget: Option<u64>,
}

/// Footprint of fully decoded records held in memory.
pub fn estimate_footprint(file_size: u64, expansion_factor: f64) -> u64 {
    let estimate = (file_size as f64 * expansion_factor).ceil();
    if estimate >= u64::MAX as f64 {
        u64::MAX
    } else {
        estimate as u64
    }
}

/// Footprint of the path index alone, for consumers that stream records.
pub fn estimate_index_footprint(record_count: u64) -> u64 {
    record_count.saturating_mul(INDEX_BYTES_PER_RECORD)
}

/// Check that a session over `file_size` bytes of MFT fits in memory.
///
/// With a configured budget this is a comparison. Without one, an allocation
/// of the estimated size is reserved and released immediately; the reservation
/// is never touched, so small inputs pay almost nothing for it.
pub fn check_feasibility(
    path: &str,
    file_size: u64,
    config: &SessionConfig,
) -> Result<MemoryEstimate> {
    let estimated_bytes = if config.retain_records {
        estimate_footprint(file_size, config.expansion_factor)
    } else {
        let record_count = file_size.checked_div(config.record_size as u64).unwrap_or(0);
        estimate_index_footprint(record_count)
    };
    let estimate = MemoryEstimate {
        file_size,
        expansion_factor: config.expansion_factor,
        retain_records: config.retain_records,
        estimated_bytes,
        budget: config.memory_budget,
    };

    let exhausted = |limit: String| MftError::ResourceExhaustion {
        path: path.to_string(),
        estimated: estimated_bytes,
        limit,
        advice: exhaustion_advice(config),
    };

    match config.memory_budget {
        Some(budget) if estimated_bytes > budget => {
            Err(exhausted(format!("the configured budget of {} bytes", budget)))
        }
        Some(_) => Ok(estimate),
        None => {
            probe_allocation(estimated_bytes).map_err(exhausted)?;
            Ok(estimate)
        }
    }
}

fn exhaustion_advice(config: &SessionConfig) -> String {
    if config.retain_records {
        "Set retain_records to false (stream the output as jsonl, csv or bodyfile \
         instead of a json array) or raise the memory budget."
            .to_string()
    } else {
        "Records are already streamed and only the path index is counted; \
         raise the memory budget or free memory."
            .to_string()
    }
}

fn probe_allocation(bytes: u64) -> std::result::Result<(), String> {
    let bytes = usize::try_from(bytes)
        .map_err(|_| "the addressable memory of this platform".to_string())?;
    let mut probe: Vec<u8> = Vec::new();
    probe
        .try_reserve_exact(bytes)
        .map_err(|e| format!("what the allocator could provide ({})", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_uses_expansion_factor() {
        assert_eq!(estimate_footprint(0, 4.39), 0);
        assert_eq!(estimate_footprint(1024, 4.39), 4496);
        assert_eq!(estimate_footprint(1000, 2.0), 2000);
    }

    #[test]
    fn test_estimate_saturates() {
        assert_eq!(estimate_footprint(u64::MAX, 4.39), u64::MAX);
    }

    #[test]
    fn test_budget_exceeded() {
        let config = SessionConfig::default().with_memory_budget(Some(4000));
        let err = check_feasibility("mft.bin", 1024, &config).unwrap_err();
        match err {
            MftError::ResourceExhaustion { path, estimated, limit, advice } => {
                assert_eq!(path, "mft.bin");
                assert_eq!(estimated, 4496);
                assert!(limit.contains("4000"));
                assert!(advice.contains("retain_records to false"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_budget_satisfied() {
        let config = SessionConfig::default().with_memory_budget(Some(1 << 20));
        let estimate = check_feasibility("mft.bin", 1024, &config).unwrap();
        assert_eq!(estimate.estimated_bytes, 4496);
        assert_eq!(estimate.budget, Some(1 << 20));
    }

    #[test]
    fn test_streaming_counts_only_the_index() {
        let config = SessionConfig::default().with_retain_records(false);
        let estimate = check_feasibility("mft.bin", 8 * 1024, &config).unwrap();
        assert!(!estimate.retain_records);
        assert_eq!(estimate.estimated_bytes, 8 * INDEX_BYTES_PER_RECORD);
    }

    #[test]
    fn test_disabling_retention_fits_the_same_budget() {
        // 16 records: 71926 bytes retained, 4096 bytes streamed
        let retained = SessionConfig::default().with_memory_budget(Some(10_000));
        assert!(check_feasibility("mft.bin", 16 * 1024, &retained).is_err());

        let streamed = retained.with_retain_records(false);
        let estimate = check_feasibility("mft.bin", 16 * 1024, &streamed).unwrap();
        assert_eq!(estimate.estimated_bytes, 4096);
    }

    #[test]
    fn test_streaming_advice_does_not_suggest_disabling_retention() {
        let config = SessionConfig::default()
            .with_retain_records(false)
            .with_memory_budget(Some(100));
        let err = check_feasibility("mft.bin", 4 * 1024, &config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("1024 bytes"));
        assert!(!message.contains("retain_records to false"));
        assert!(message.contains("raise the memory budget"));
    }

    #[test]
    fn test_probe_passes_small_inputs() {
        let config = SessionConfig::default();
        assert!(check_feasibility("mft.bin", 64 * 1024, &config).is_ok());
    }

    #[test]
    fn test_probe_rejects_impossible_sizes() {
        let config = SessionConfig::default();
        let err = check_feasibility("huge.bin", u64::MAX / 2, &config).unwrap_err();
        assert!(matches!(err, MftError::ResourceExhaustion { .. }));
        assert!(err.to_string().contains("huge.bin"));
    }
}
