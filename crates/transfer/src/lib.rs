//! Resumable, concurrent multipart transfers against an object store.
//!
//! A transfer is split into fixed-size parts ([`plan`]). Uploads consult a
//! [`ChecksumIndex`] built from the parts the remote already holds and
//! only send the delta. Downloads continue after the bytes already on
//! disk and reassemble out-of-order responses through an
//! [`OrderedWriter`]. Both directions run a bounded [`WorkerPool`] fed by
//! a [`TransferQueue`], orchestrated by the [`TransferCoordinator`].

mod chunked;
mod config;
mod coordinator;
mod error;
mod index;
mod operations;
mod planner;
mod pool;
mod progress;
mod queue;
mod store;
mod types;
mod validation;
mod writer;

#[cfg(test)]
mod test_support;

pub use chunked::{PartReader, checksums_match, open_destination, part_etag};
pub use config::{DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE, TransferConfig};
pub use coordinator::TransferCoordinator;
pub use error::TransferError;
pub use index::{ChecksumIndex, PartDecision};
pub use operations::{DownloadPartOp, UploadPartOp};
pub use planner::{MAX_PARTS, checked_plan, part_count, plan};
pub use pool::{OperationFuture, PartOperation, PartReceipt, PoolHandle, WorkerPool, WorkerReport};
pub use progress::{DEFAULT_REPORT_INTERVAL, ProgressSnapshot, ProgressTracker};
pub use queue::{PartJob, QueueProducer, TransferQueue, UploadJob, bounded};
pub use store::{
    CompletedPart, MultipartUpload, ObjectHead, ObjectStoreClient, RemotePartRecord, StoreError,
    StoreFuture,
};
pub use types::{
    Direction, Part, PartStatus, SessionState, TransferEvent, TransferOutcome, TransferResult,
    TransferSession,
};
pub use validation::{object_key, validate_key};
pub use writer::{OrderedWriter, Reservation};
