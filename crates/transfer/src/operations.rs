//! Remote part operations run by the worker pool.

use std::sync::Arc;

use tokio::fs::File;
use tokio_util::sync::CancellationToken;

use crate::pool::{OperationFuture, PartOperation, PartReceipt};
use crate::queue::UploadJob;
use crate::store::{MultipartUpload, ObjectStoreClient};
use crate::types::Part;
use crate::writer::OrderedWriter;

/// Sends one part of a multipart upload.
pub struct UploadPartOp {
    pub store: Arc<dyn ObjectStoreClient>,
    pub upload: MultipartUpload,
}

impl PartOperation for UploadPartOp {
    type Job = UploadJob;

    fn execute<'a>(
        &'a self,
        job: UploadJob,
        _signal: &'a CancellationToken,
    ) -> OperationFuture<'a> {
        Box::pin(async move {
            let bytes = job.data.len() as u64;
            let etag = self
                .store
                .put_part(&self.upload, job.part.number, &job.data)
                .await?;
            // Stores that return no ETag get the locally computed one.
            let checksum = if etag.is_empty() {
                job.part.checksum
            } else {
                Some(etag)
            };
            Ok(PartReceipt { bytes, checksum })
        })
    }
}

/// Fetches one byte range and hands it to the ordered writer.
///
/// The part only counts as done once the writer has committed it. It stays
/// reserved in the writer while fetching, so later parts waiting at the
/// ordering gate do not give up on it after the session is cancelled.
pub struct DownloadPartOp {
    pub store: Arc<dyn ObjectStoreClient>,
    pub key: String,
    pub writer: Arc<OrderedWriter<File>>,
}

impl PartOperation for DownloadPartOp {
    type Job = Part;

    fn execute<'a>(&'a self, part: Part, signal: &'a CancellationToken) -> OperationFuture<'a> {
        Box::pin(async move {
            let _slot = self.writer.reserve(&part);
            let bytes = self
                .store
                .get_range(&self.key, part.offset, part.end_inclusive())
                .await?;
            self.writer.commit(&part, &bytes, signal).await?;
            Ok(PartReceipt {
                bytes: bytes.len() as u64,
                checksum: None,
            })
        })
    }
}
