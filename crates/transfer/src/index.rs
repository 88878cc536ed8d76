//! Upload resume index.
//!
//! Built from the parts an unfinished upload already holds remotely, it
//! decides which local parts must be (re)sent. Re-running a resume only
//! transmits the delta.

use std::collections::HashMap;

use tracing::debug;

use crate::chunked::checksums_match;
use crate::store::RemotePartRecord;

/// What to do with a candidate part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartDecision {
    /// No remote record for this part number.
    Upload,
    /// Remote holds identical content.
    Skip,
    /// Remote holds different content; the part is sent again.
    Overwrite,
}

impl PartDecision {
    pub fn needs_upload(self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// Remote part records keyed by part number.
#[derive(Debug, Default)]
pub struct ChecksumIndex {
    records: HashMap<u32, RemotePartRecord>,
}

impl ChecksumIndex {
    pub fn new(records: impl IntoIterator<Item = RemotePartRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.number, r)).collect(),
        }
    }

    /// Decides whether part `number` with local `checksum` must be sent.
    ///
    /// A checksum difference is treated as a content change, not corruption.
    pub fn decide(&self, number: u32, checksum: &str) -> PartDecision {
        match self.records.get(&number) {
            None => {
                debug!(part = number, "part not found remotely");
                PartDecision::Upload
            }
            Some(record) if checksums_match(&record.checksum, checksum) => {
                debug!(part = number, size = record.size, checksum, "part already stored");
                PartDecision::Skip
            }
            Some(record) => {
                debug!(
                    part = number,
                    remote = %record.checksum,
                    local = checksum,
                    "part checksum changed, re-uploading"
                );
                PartDecision::Overwrite
            }
        }
    }

    pub fn needs_upload(&self, number: u32, checksum: &str) -> bool {
        self.decide(number, checksum).needs_upload()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
