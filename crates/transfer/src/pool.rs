//! Fixed pool of part workers.
//!
//! Each worker repeatedly takes one job from the shared queue and runs the
//! part operation. Failure policy: the first failure fires the session
//! signal; workers check it before taking another job, while a job already
//! running is left to finish. Workers never retry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TransferError;
use crate::queue::{PartJob, TransferQueue};

/// Boxed future returned by [`PartOperation::execute`].
pub type OperationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<PartReceipt, TransferError>> + Send + 'a>>;

/// What a finished part reports back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    /// Bytes moved over the network.
    pub bytes: u64,
    /// Checksum confirmed for the part, if the operation produced one.
    pub checksum: Option<String>,
}

/// The remote I/O performed for one part.
pub trait PartOperation: Send + Sync + 'static {
    type Job: PartJob;

    /// Runs the job. `signal` is the session failure signal; operations
    /// must not abandon in-flight remote calls when it fires.
    fn execute<'a>(&'a self, job: Self::Job, signal: &'a CancellationToken) -> OperationFuture<'a>;
}

/// Messages workers send to the coordinator, which owns all part state.
#[derive(Debug)]
pub enum WorkerReport {
    Started {
        number: u32,
    },
    Completed {
        number: u32,
        receipt: PartReceipt,
    },
    Failed {
        number: u32,
        error: TransferError,
    },
    /// The job stopped because the session failed elsewhere.
    Abandoned {
        number: u32,
    },
    /// Upload producer found the part already stored remotely.
    Skipped {
        number: u32,
        checksum: String,
    },
}

/// Spawns and tracks `concurrency` worker tasks.
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Starts the workers. They exit when the queue is exhausted or the
    /// signal fires.
    pub fn spawn<O: PartOperation>(
        &self,
        queue: TransferQueue<O::Job>,
        operation: Arc<O>,
        signal: CancellationToken,
        reports: mpsc::UnboundedSender<WorkerReport>,
    ) -> PoolHandle {
        let mut tasks = JoinSet::new();
        for worker in 0..self.concurrency {
            tasks.spawn(run_worker(
                worker,
                queue.clone(),
                Arc::clone(&operation),
                signal.clone(),
                reports.clone(),
            ));
        }
        PoolHandle { tasks }
    }
}

/// Handle to the running workers.
pub struct PoolHandle {
    tasks: JoinSet<()>,
}

impl PoolHandle {
    /// Waits for every worker to exit.
    pub async fn join(mut self) -> Result<(), TransferError> {
        let mut first_error = None;
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "worker task failed");
                first_error.get_or_insert(TransferError::Task(e.to_string()));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn run_worker<O: PartOperation>(
    worker: usize,
    queue: TransferQueue<O::Job>,
    operation: Arc<O>,
    signal: CancellationToken,
    reports: mpsc::UnboundedSender<WorkerReport>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            job = queue.next() => job,
        };
        let Some(job) = job else {
            break;
        };

        let number = job.part().number;
        if signal.is_cancelled() {
            let _ = reports.send(WorkerReport::Abandoned { number });
            break;
        }

        let _ = reports.send(WorkerReport::Started { number });
        let report = match operation.execute(job, &signal).await {
            Ok(receipt) => WorkerReport::Completed { number, receipt },
            Err(TransferError::Cancelled) => WorkerReport::Abandoned { number },
            Err(error) => {
                warn!(worker, part = number, error = %error, "part failed");
                signal.cancel();
                WorkerReport::Failed { number, error }
            }
        };
        let _ = reports.send(report);
    }
    debug!(worker, "worker exiting");
}
