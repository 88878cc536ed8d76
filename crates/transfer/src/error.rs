//! Transfer error types.

use crate::store::StoreError;

/// Errors produced by the transfer engine.
///
/// Part-level failures are never returned one by one: the coordinator
/// aggregates them into [`TransferError::PartsFailed`].
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    #[error("remote content length unavailable for {0}")]
    ContentLengthUnavailable(String),

    #[error("remote object is smaller than local file: {remote} < {local}")]
    RemoteSmallerThanLocal { remote: u64, local: u64 },

    #[error("source changed while reading part {number}: expected {expected} bytes")]
    SourceChanged { number: u32, expected: u64 },

    #[error("{parts} parts needed, at most {max} allowed; raise the part size")]
    TooManyParts { parts: u64, max: u64 },

    #[error("part {number} has {got} bytes, expected {expected}")]
    PartLength { number: u32, expected: u64, got: u64 },

    #[error("part at offset {offset} committed out of order (cursor at {cursor})")]
    OutOfOrder { offset: u64, cursor: u64 },

    #[error("parts failed: {failed:?} (first error: {first_error})")]
    PartsFailed { failed: Vec<u32>, first_error: String },

    #[error("finalize failed: {source}{}", abort_suffix(.abort_error))]
    Finalize {
        source: StoreError,
        abort_error: Option<String>,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("worker task failed: {0}")]
    Task(String),

    #[error("cancelled")]
    Cancelled,
}

fn abort_suffix(abort_error: &Option<String>) -> String {
    match abort_error {
        Some(e) => format!(" (abort also failed: {e})"),
        None => String::new(),
    }
}

impl TransferError {
    /// Returns `true` if the error was raised before any part I/O started.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            Self::ContentLengthUnavailable(_)
                | Self::RemoteSmallerThanLocal { .. }
                | Self::TooManyParts { .. }
                | Self::InvalidConfig(_)
                | Self::InvalidKey(_)
        )
    }
}
