use std::collections::BTreeSet;

use crate::TransferError;
use crate::config::TransferConfig;
use crate::store::CompletedPart;

/// Lifecycle of a single part within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// A contiguous byte range of the transferred object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// 1-based part number.
    pub number: u32,
    /// Byte offset within the object.
    pub offset: u64,
    /// Length in bytes (never zero).
    pub length: u64,
    /// Content checksum once known (ETag format).
    pub checksum: Option<String>,
    pub status: PartStatus,
}

impl Part {
    pub fn new(number: u32, offset: u64, length: u64) -> Self {
        Self {
            number,
            offset,
            length,
            checksum: None,
            status: PartStatus::Pending,
        }
    }

    /// Offset one past the last byte of this part.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Offset of the last byte of this part.
    pub fn end_inclusive(&self) -> u64 {
        self.end() - 1
    }
}

/// Direction of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Planning,
    InFlight,
    Finalizing,
    Completed,
    Aborted,
}

/// Part bookkeeping for one resumable transfer call.
///
/// Owned exclusively by the coordinator; workers only see copies of
/// individual [`Part`] descriptors.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub key: String,
    /// Upload id for uploads, object key for downloads.
    pub remote_handle: String,
    pub direction: Direction,
    pub part_size: u64,
    pub concurrency: usize,
    pub parts: Vec<Part>,
    state: SessionState,
}

impl TransferSession {
    pub fn new(
        key: impl Into<String>,
        remote_handle: impl Into<String>,
        direction: Direction,
        config: &TransferConfig,
        parts: Vec<Part>,
    ) -> Self {
        Self {
            key: key.into(),
            remote_handle: remote_handle.into(),
            direction,
            part_size: config.part_size,
            concurrency: config.concurrency,
            parts,
            state: SessionState::Planning,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Returns a part by its number.
    pub fn part_mut(&mut self, number: u32) -> Option<&mut Part> {
        // Parts are planned in ascending order starting at 1.
        let idx = (number as usize).checked_sub(1)?;
        self.parts.get_mut(idx).filter(|p| p.number == number)
    }

    /// Sets the status of a part. Unknown numbers are ignored.
    pub fn mark(&mut self, number: u32, status: PartStatus) {
        if let Some(part) = self.part_mut(number) {
            part.status = status;
        }
    }

    /// Total bytes covered by the planned parts.
    pub fn planned_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.length).sum()
    }

    /// Returns `true` when every planned part reached `Done`.
    pub fn all_done(&self) -> bool {
        self.parts.iter().all(|p| p.status == PartStatus::Done)
    }

    /// Numbers of the parts that failed.
    pub fn failed_parts(&self) -> BTreeSet<u32> {
        self.parts
            .iter()
            .filter(|p| p.status == PartStatus::Failed)
            .map(|p| p.number)
            .collect()
    }

    /// Ordered part list for the finalize call.
    ///
    /// Returns `None` if any part is not done or has no checksum.
    pub fn completed_parts(&self) -> Option<Vec<CompletedPart>> {
        self.parts
            .iter()
            .map(|p| match (&p.status, &p.checksum) {
                (PartStatus::Done, Some(checksum)) => Some(CompletedPart {
                    number: p.number,
                    checksum: checksum.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Terminal outcome of a transfer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every planned part is done (and, for uploads, finalize succeeded).
    Completed,
    /// Local and remote sizes already matched; nothing was transferred.
    AlreadyComplete,
    /// A part failed, finalize failed, or a pre-flight check failed.
    Aborted,
}

/// Terminal result of a transfer call.
#[derive(Debug)]
pub struct TransferResult {
    pub key: String,
    pub direction: Direction,
    pub outcome: TransferOutcome,
    /// Bytes actually moved over the network during this call.
    pub bytes_moved: u64,
    pub parts_planned: usize,
    /// Upload parts skipped because the remote already held them.
    pub parts_skipped: usize,
    pub failed_parts: BTreeSet<u32>,
    pub fatal_error: Option<TransferError>,
}

impl TransferResult {
    pub(crate) fn new(key: &str, direction: Direction) -> Self {
        Self {
            key: key.to_string(),
            direction,
            outcome: TransferOutcome::Aborted,
            bytes_moved: 0,
            parts_planned: 0,
            parts_skipped: 0,
            failed_parts: BTreeSet::new(),
            fatal_error: None,
        }
    }

    pub(crate) fn aborted(key: &str, direction: Direction, error: TransferError) -> Self {
        Self {
            fatal_error: Some(error),
            ..Self::new(key, direction)
        }
    }

    /// Returns `true` for `Completed` and `AlreadyComplete`.
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            TransferOutcome::Completed | TransferOutcome::AlreadyComplete
        ) && self.fatal_error.is_none()
    }

    /// Final coordinator state.
    pub fn state(&self) -> SessionState {
        if self.is_success() {
            SessionState::Completed
        } else {
            SessionState::Aborted
        }
    }

    /// Converts a failed result into its error.
    pub fn into_result(mut self) -> Result<Self, TransferError> {
        if let Some(err) = self.fatal_error.take() {
            return Err(err);
        }
        if !self.is_success() {
            return Err(TransferError::PartsFailed {
                failed: self.failed_parts.iter().copied().collect(),
                first_error: "transfer aborted".into(),
            });
        }
        Ok(self)
    }
}

/// Progress notifications emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Planned {
        key: String,
        direction: Direction,
        parts: usize,
        total_bytes: u64,
        start_offset: u64,
    },
    PartSkipped {
        number: u32,
        length: u64,
    },
    PartStarted {
        number: u32,
    },
    PartCompleted {
        number: u32,
        length: u64,
        bytes_moved: u64,
    },
    PartFailed {
        number: u32,
        error: String,
    },
    Finalizing {
        parts: usize,
    },
    Completed {
        bytes_moved: u64,
    },
    AlreadyComplete,
    Aborted {
        error: String,
    },
}
