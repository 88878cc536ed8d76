//! Bounded part-job queue: one producer, many worker consumers.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::types::Part;

/// A unit of work the pool can execute.
pub trait PartJob: Send + 'static {
    fn part(&self) -> &Part;
}

impl PartJob for Part {
    fn part(&self) -> &Part {
        self
    }
}

/// An upload job carries the part bytes read by the producer.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub part: Part,
    pub data: Vec<u8>,
}

impl PartJob for UploadJob {
    fn part(&self) -> &Part {
        &self.part
    }
}

/// Creates a queue holding at most `capacity` pending jobs.
pub fn bounded<J: PartJob>(capacity: usize) -> (QueueProducer<J>, TransferQueue<J>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueProducer { tx },
        TransferQueue {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Feeding side of the queue. Dropping it closes the queue.
pub struct QueueProducer<J> {
    tx: mpsc::Sender<J>,
}

impl<J: PartJob> QueueProducer<J> {
    /// Enqueues a job, waiting while the queue is full.
    ///
    /// Returns `false` without enqueuing if `signal` fires while waiting
    /// or every consumer is gone.
    pub async fn push(&self, job: J, signal: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = signal.cancelled() => false,
            sent = self.tx.send(job) => sent.is_ok(),
        }
    }
}

/// Draining side of the queue, shared by all workers.
pub struct TransferQueue<J> {
    rx: Arc<Mutex<mpsc::Receiver<J>>>,
}

impl<J> Clone for TransferQueue<J> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<J: PartJob> TransferQueue<J> {
    /// Takes the next job in FIFO order.
    ///
    /// Returns `None` once the producer is dropped and the queue is drained.
    pub async fn next(&self) -> Option<J> {
        self.rx.lock().await.recv().await
    }
}
