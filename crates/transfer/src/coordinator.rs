//! Transfer coordinator.
//!
//! Drives one resumable transfer call through
//! `Planning -> InFlight -> Finalizing -> {Completed, Aborted}`. The
//! coordinator owns the [`TransferSession`]; workers report back over a
//! channel and never touch session state directly.

use std::path::Path;
use std::sync::Arc;

use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::{PartReader, open_destination, part_etag};
use crate::config::TransferConfig;
use crate::index::ChecksumIndex;
use crate::operations::{DownloadPartOp, UploadPartOp};
use crate::planner;
use crate::pool::{WorkerPool, WorkerReport};
use crate::queue::{self, QueueProducer, UploadJob};
use crate::store::{MultipartUpload, ObjectStoreClient};
use crate::types::{
    Direction, Part, PartStatus, SessionState, TransferEvent, TransferOutcome, TransferResult,
    TransferSession,
};
use crate::validation::validate_key;
use crate::writer::OrderedWriter;

/// Runs resumable uploads and downloads against an object store.
pub struct TransferCoordinator {
    store: Arc<dyn ObjectStoreClient>,
    config: TransferConfig,
    events: Option<mpsc::Sender<TransferEvent>>,
    cancel: CancellationToken,
}

impl TransferCoordinator {
    pub fn new(store: Arc<dyn ObjectStoreClient>, config: TransferConfig) -> Self {
        Self {
            store,
            config,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Emits progress events on `events`. The receiver must be drained,
    /// otherwise the coordinator waits for channel capacity.
    pub fn with_events(mut self, events: mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Uses `cancel` as the parent of every session failure signal.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Initiates a multipart upload for `key` and transfers `source` into it.
    ///
    /// Returns the upload handle so a failed transfer can be resumed.
    pub async fn start_upload(
        &self,
        source: &Path,
        key: &str,
    ) -> Result<(MultipartUpload, TransferResult), TransferError> {
        validate_key(key)?;
        self.config.validate()?;
        let upload = self.store.initiate_multipart_upload(key).await?;
        info!(key, upload_id = %upload.upload_id, "multipart upload initiated");

        let result = self.resume_upload(source, &upload).await;
        Ok((upload, result))
    }

    /// Uploads the parts of `source` the remote upload does not hold yet,
    /// then completes the upload.
    ///
    /// Parts already stored with a matching checksum are skipped. A part
    /// failure leaves the upload open so the call can be repeated; a
    /// finalize failure aborts it.
    pub async fn resume_upload(&self, source: &Path, upload: &MultipartUpload) -> TransferResult {
        match self.run_upload(source, upload).await {
            Ok(result) => result,
            Err(err) => self.reject(&upload.key, Direction::Upload, err).await,
        }
    }

    async fn run_upload(
        &self,
        source: &Path,
        upload: &MultipartUpload,
    ) -> Result<TransferResult, TransferError> {
        self.preflight()?;

        let reader = PartReader::open(source).await?;
        let index = ChecksumIndex::new(self.store.list_parts(upload).await?);
        debug!(key = %upload.key, remote_parts = index.len(), "loaded remote parts");

        let parts = planner::checked_plan(reader.file_size(), self.config.part_size, 0)?;
        let session = TransferSession::new(
            &upload.key,
            &upload.upload_id,
            Direction::Upload,
            &self.config,
            parts,
        );
        let mut ledger = Ledger::new(session);
        self.announce(&ledger.session, 0).await;

        ledger.session.set_state(SessionState::InFlight);
        let signal = self.cancel.child_token();
        let (producer, queue) = queue::bounded(self.config.concurrency);
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let operation = Arc::new(UploadPartOp {
            store: Arc::clone(&self.store),
            upload: upload.clone(),
        });
        let pool = WorkerPool::new(self.config.concurrency).spawn(
            queue,
            operation,
            signal.clone(),
            report_tx.clone(),
        );
        let feeder = tokio::spawn(feed_uploads(
            reader,
            ledger.session.parts.clone(),
            index,
            producer,
            signal.clone(),
            report_tx,
        ));

        self.drain(&mut ledger, report_rx).await;
        let fed = join_feeder(feeder).await;
        let joined = pool.join().await;

        let mut outcome = ledger.settle(fed, joined);
        if outcome.is_ok() {
            outcome = self.finalize(&mut ledger.session, upload).await;
        }
        Ok(self.conclude(ledger, outcome).await)
    }

    /// Completes the upload, or aborts it exactly once if completion fails.
    async fn finalize(
        &self,
        session: &mut TransferSession,
        upload: &MultipartUpload,
    ) -> Result<(), TransferError> {
        session.set_state(SessionState::Finalizing);
        let parts = session
            .completed_parts()
            .ok_or_else(|| TransferError::Task("completed part without checksum".into()))?;

        info!(
            key = %upload.key,
            upload_id = %upload.upload_id,
            parts = parts.len(),
            "completing upload"
        );
        self.emit(TransferEvent::Finalizing { parts: parts.len() }).await;

        let Err(source) = self.store.complete_multipart_upload(upload, &parts).await else {
            return Ok(());
        };

        warn!(key = %upload.key, error = %source, "complete failed, aborting upload");
        let abort_error = match self.store.abort_multipart_upload(upload).await {
            Ok(()) => None,
            Err(e) => {
                warn!(key = %upload.key, error = %e, "abort failed");
                Some(e.to_string())
            }
        };
        Err(TransferError::Finalize {
            source,
            abort_error,
        })
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Downloads `key` into `destination`, continuing after any bytes the
    /// destination already holds.
    ///
    /// A destination whose size equals the remote content length is left
    /// untouched and reported as [`TransferOutcome::AlreadyComplete`].
    pub async fn resume_download(&self, key: &str, destination: &Path) -> TransferResult {
        match self.run_download(key, destination).await {
            Ok(result) => result,
            Err(err) => self.reject(key, Direction::Download, err).await,
        }
    }

    async fn run_download(
        &self,
        key: &str,
        destination: &Path,
    ) -> Result<TransferResult, TransferError> {
        self.preflight()?;

        let head = self.store.head_object(key).await?;
        debug!(key, length = ?head.content_length, etag = ?head.etag, "remote object");
        let remote = head
            .content_length
            .ok_or_else(|| TransferError::ContentLengthUnavailable(key.to_string()))?;

        let (file, local) = open_destination(destination).await?;
        if remote < local {
            return Err(TransferError::RemoteSmallerThanLocal { remote, local });
        }
        if remote == local {
            info!(key, size = remote, "local file already complete");
            let mut result = TransferResult::new(key, Direction::Download);
            result.outcome = TransferOutcome::AlreadyComplete;
            self.emit(TransferEvent::AlreadyComplete).await;
            return Ok(result);
        }

        let parts = planner::checked_plan(remote, self.config.part_size, local)?;
        let session = TransferSession::new(key, key, Direction::Download, &self.config, parts);
        let mut ledger = Ledger::new(session);
        self.announce(&ledger.session, local).await;

        ledger.session.set_state(SessionState::InFlight);
        let signal = self.cancel.child_token();
        let (producer, queue) = queue::bounded(self.config.concurrency);
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let writer = Arc::new(OrderedWriter::new(file, local));
        let operation = Arc::new(DownloadPartOp {
            store: Arc::clone(&self.store),
            key: key.to_string(),
            writer: Arc::clone(&writer),
        });
        let pool = WorkerPool::new(self.config.concurrency).spawn(
            queue,
            operation,
            signal.clone(),
            report_tx,
        );
        let feeder = tokio::spawn(feed_parts(
            ledger.session.parts.clone(),
            producer,
            signal.clone(),
        ));

        self.drain(&mut ledger, report_rx).await;
        let fed = join_feeder(feeder).await;
        let joined = pool.join().await;
        debug!(key, cursor = writer.next_offset(), "download workers finished");
        let closed = close_writer(writer).await;

        let outcome = ledger.settle(fed, joined.and(closed));
        Ok(self.conclude(ledger, outcome).await)
    }

    // -----------------------------------------------------------------------
    // Shared session plumbing
    // -----------------------------------------------------------------------

    fn preflight(&self) -> Result<(), TransferError> {
        self.config.validate()?;
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }

    async fn announce(&self, session: &TransferSession, start_offset: u64) {
        info!(
            key = %session.key,
            direction = ?session.direction,
            parts = session.parts.len(),
            bytes = session.planned_bytes(),
            start_offset,
            concurrency = session.concurrency,
            "transfer planned"
        );
        self.emit(TransferEvent::Planned {
            key: session.key.clone(),
            direction: session.direction,
            parts: session.parts.len(),
            total_bytes: session.planned_bytes(),
            start_offset,
        })
        .await;
    }

    /// Applies worker reports until every reporter has exited.
    async fn drain(&self, ledger: &mut Ledger, mut reports: mpsc::UnboundedReceiver<WorkerReport>) {
        while let Some(report) = reports.recv().await {
            if let Some(event) = ledger.apply(report) {
                self.emit(event).await;
            }
        }
    }

    async fn conclude(
        &self,
        mut ledger: Ledger,
        outcome: Result<(), TransferError>,
    ) -> TransferResult {
        ledger.result.failed_parts = ledger.session.failed_parts();
        match outcome {
            Ok(()) => {
                ledger.session.set_state(SessionState::Completed);
                ledger.result.outcome = TransferOutcome::Completed;
                info!(
                    key = %ledger.session.key,
                    bytes = ledger.result.bytes_moved,
                    skipped = ledger.result.parts_skipped,
                    "transfer completed"
                );
                self.emit(TransferEvent::Completed {
                    bytes_moved: ledger.result.bytes_moved,
                })
                .await;
            }
            Err(err) => {
                ledger.session.set_state(SessionState::Aborted);
                warn!(
                    key = %ledger.session.key,
                    failed = ?ledger.result.failed_parts,
                    error = %err,
                    "transfer aborted"
                );
                self.emit(TransferEvent::Aborted {
                    error: err.to_string(),
                })
                .await;
                ledger.result.outcome = TransferOutcome::Aborted;
                ledger.result.fatal_error = Some(err);
            }
        }
        ledger.result
    }

    /// Builds the result for a call that failed before any part I/O.
    async fn reject(&self, key: &str, direction: Direction, err: TransferError) -> TransferResult {
        warn!(key, ?direction, error = %err, "transfer rejected");
        self.emit(TransferEvent::Aborted {
            error: err.to_string(),
        })
        .await;
        TransferResult::aborted(key, direction, err)
    }

    async fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Coordinator-side part bookkeeping for one session.
struct Ledger {
    session: TransferSession,
    result: TransferResult,
    first_error: Option<String>,
}

impl Ledger {
    fn new(session: TransferSession) -> Self {
        let mut result = TransferResult::new(&session.key, session.direction);
        result.parts_planned = session.parts.len();
        Self {
            session,
            result,
            first_error: None,
        }
    }

    fn length_of(&mut self, number: u32) -> u64 {
        self.session.part_mut(number).map_or(0, |p| p.length)
    }

    /// Records a worker report and returns the event it produces.
    fn apply(&mut self, report: WorkerReport) -> Option<TransferEvent> {
        match report {
            WorkerReport::Started { number } => {
                self.session.mark(number, PartStatus::InFlight);
                Some(TransferEvent::PartStarted { number })
            }
            WorkerReport::Completed { number, receipt } => {
                if let Some(part) = self.session.part_mut(number) {
                    part.status = PartStatus::Done;
                    if receipt.checksum.is_some() {
                        part.checksum = receipt.checksum;
                    }
                }
                self.result.bytes_moved += receipt.bytes;
                debug!(part = number, bytes = receipt.bytes, "part done");
                Some(TransferEvent::PartCompleted {
                    number,
                    length: self.length_of(number),
                    bytes_moved: self.result.bytes_moved,
                })
            }
            WorkerReport::Skipped { number, checksum } => {
                if let Some(part) = self.session.part_mut(number) {
                    part.status = PartStatus::Done;
                    part.checksum = Some(checksum);
                }
                self.result.parts_skipped += 1;
                Some(TransferEvent::PartSkipped {
                    number,
                    length: self.length_of(number),
                })
            }
            WorkerReport::Failed { number, error } => {
                self.session.mark(number, PartStatus::Failed);
                let error = error.to_string();
                self.first_error.get_or_insert_with(|| error.clone());
                Some(TransferEvent::PartFailed { number, error })
            }
            WorkerReport::Abandoned { number } => {
                self.session.mark(number, PartStatus::Pending);
                None
            }
        }
    }

    /// Decides whether the in-flight phase succeeded.
    fn settle(
        &mut self,
        fed: Result<(), TransferError>,
        joined: Result<(), TransferError>,
    ) -> Result<(), TransferError> {
        let failed = self.session.failed_parts();
        if !failed.is_empty() {
            return Err(TransferError::PartsFailed {
                failed: failed.into_iter().collect(),
                first_error: self.first_error.take().unwrap_or_default(),
            });
        }
        fed?;
        joined?;
        if !self.session.all_done() {
            // Nothing failed, so the session was cancelled from outside.
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }
}

/// Flushes the destination and syncs it to disk once every worker is gone.
async fn close_writer(writer: Arc<OrderedWriter<File>>) -> Result<(), TransferError> {
    let writer = Arc::try_unwrap(writer)
        .map_err(|_| TransferError::Task("download writer still in use".into()))?;
    let file = writer.into_inner().await?;
    file.sync_all().await?;
    Ok(())
}

async fn join_feeder(feeder: JoinHandle<Result<(), TransferError>>) -> Result<(), TransferError> {
    match feeder.await {
        Ok(res) => res,
        Err(e) => Err(TransferError::Task(e.to_string())),
    }
}

/// Reads each part, skips those the remote already holds, and queues the
/// rest. Stops at the first read error or when the signal fires.
async fn feed_uploads(
    mut reader: PartReader,
    parts: Vec<Part>,
    index: ChecksumIndex,
    producer: QueueProducer<UploadJob>,
    signal: CancellationToken,
    reports: mpsc::UnboundedSender<WorkerReport>,
) -> Result<(), TransferError> {
    for mut part in parts {
        if signal.is_cancelled() {
            break;
        }

        let data = match reader.read_part(&part).await {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    path = %reader.path().display(),
                    part = part.number,
                    error = %e,
                    "source read failed"
                );
                signal.cancel();
                return Err(e);
            }
        };

        let checksum = part_etag(&data);
        if !index.needs_upload(part.number, &checksum) {
            let _ = reports.send(WorkerReport::Skipped {
                number: part.number,
                checksum,
            });
            continue;
        }

        part.checksum = Some(checksum);
        if !producer.push(UploadJob { part, data }, &signal).await {
            break;
        }
    }
    Ok(())
}

/// Queues download parts in ascending order.
async fn feed_parts(
    parts: Vec<Part>,
    producer: QueueProducer<Part>,
    signal: CancellationToken,
) -> Result<(), TransferError> {
    for part in parts {
        if !producer.push(part, &signal).await {
            break;
        }
    }
    Ok(())
}
