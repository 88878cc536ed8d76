//! Transfer session configuration.

use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Default part size: 5 MiB.
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of concurrent part workers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Part size and concurrency for one transfer session.
///
/// Passed to the coordinator at session start; nothing in the engine reads
/// global constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Size of every part except the last, in bytes.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Number of worker units, which is also the job queue capacity.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl TransferConfig {
    pub fn new(part_size: u64, concurrency: usize) -> Self {
        Self {
            part_size,
            concurrency,
        }
    }

    /// Rejects values the planner and worker pool cannot run with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.part_size == 0 {
            return Err(TransferError::InvalidConfig(
                "part size must be greater than zero".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(TransferError::InvalidConfig(
                "concurrency must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
