//! Object store capability consumed by the transfer engine.
//!
//! The engine does not know how requests are authenticated or
//! transported. Callers provide an [`ObjectStoreClient`] implementation
//! (an SDK wrapper, a local directory store, or a test mock) and the
//! coordinator drives it.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed future returned by every [`ObjectStoreClient`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors reported by an object store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    #[error("invalid range {start}-{end} for {key}")]
    InvalidRange { key: String, start: u64, end: u64 },

    #[error("invalid part: {0}")]
    InvalidPart(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Handle of a remote multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultipartUpload {
    /// Object key the upload will produce.
    pub key: String,
    /// Store-assigned upload identifier.
    pub upload_id: String,
}

impl MultipartUpload {
    pub fn new(key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            upload_id: upload_id.into(),
        }
    }
}

/// A part the remote store already holds for an unfinished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePartRecord {
    pub number: u32,
    pub checksum: String,
    pub size: u64,
}

/// Entry of the ordered part list sent with the finalize call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub number: u32,
    pub checksum: String,
}

/// Object metadata relevant to transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    /// `Content-Length` of the object, if the store reported one.
    pub content_length: Option<u64>,
    pub etag: Option<String>,
}

/// Abstract connection to a remote object store.
///
/// Using a trait keeps the transfer engine decoupled from transport and
/// testable with mocks. None of the operations are retried by the engine.
pub trait ObjectStoreClient: Send + Sync {
    /// Returns object metadata.
    fn head_object<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectHead>;

    /// Fetches the byte range `[start, end_inclusive]` of an object.
    fn get_range<'a>(
        &'a self,
        key: &'a str,
        start: u64,
        end_inclusive: u64,
    ) -> StoreFuture<'a, Vec<u8>>;

    /// Starts a new multipart upload for `key`.
    fn initiate_multipart_upload<'a>(&'a self, key: &'a str) -> StoreFuture<'a, MultipartUpload>;

    /// Sends one part and returns the checksum the store recorded for it.
    fn put_part<'a>(
        &'a self,
        upload: &'a MultipartUpload,
        part_number: u32,
        data: &'a [u8],
    ) -> StoreFuture<'a, String>;

    /// Lists the parts already received for an unfinished upload.
    fn list_parts<'a>(&'a self, upload: &'a MultipartUpload)
    -> StoreFuture<'a, Vec<RemotePartRecord>>;

    /// Assembles the object from `parts`, which are ordered by number.
    fn complete_multipart_upload<'a>(
        &'a self,
        upload: &'a MultipartUpload,
        parts: &'a [CompletedPart],
    ) -> StoreFuture<'a, ()>;

    /// Discards an unfinished upload and its stored parts.
    fn abort_multipart_upload<'a>(&'a self, upload: &'a MultipartUpload) -> StoreFuture<'a, ()>;

    /// Lists unfinished multipart uploads.
    fn list_multipart_uploads(&self) -> StoreFuture<'_, Vec<MultipartUpload>>;
}
