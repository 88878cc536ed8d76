//! In-order reassembly of out-of-order part downloads.
//!
//! Workers finish parts in any order, but the destination only receives
//! sequential appends. A worker whose part does not start at the write
//! cursor waits on a watch channel that is updated every time a commit
//! advances the cursor.
//!
//! Once the session is cancelled, a waiting part keeps waiting only while a
//! part in front of it is still being fetched, since that part can still
//! close the gap.

use std::collections::BTreeSet;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TransferError;
use crate::types::Part;

#[derive(Debug, Default)]
struct Gate {
    /// Offset the next commit must start at.
    next: u64,
    /// Offsets of parts that are fetching or waiting to commit.
    in_flight: BTreeSet<u64>,
}

impl Gate {
    fn open_for(&self, offset: u64) -> bool {
        self.next >= offset
    }

    fn pending_before(&self, offset: u64) -> bool {
        self.next < offset && self.in_flight.range(self.next..offset).next().is_some()
    }
}

/// Serializes part commits into ascending offset order.
pub struct OrderedWriter<W> {
    sink: Mutex<W>,
    gate: watch::Sender<Gate>,
}

/// Marks a part as in flight until dropped.
#[must_use = "the part stops counting as in flight when the reservation drops"]
pub struct Reservation<'a> {
    gate: &'a watch::Sender<Gate>,
    offset: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let offset = self.offset;
        self.gate.send_modify(|g| {
            g.in_flight.remove(&offset);
        });
    }
}

impl<W> OrderedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps `sink`, whose current end is at `start_offset`.
    pub fn new(sink: W, start_offset: u64) -> Self {
        let (gate, _) = watch::channel(Gate {
            next: start_offset,
            in_flight: BTreeSet::new(),
        });
        Self {
            sink: Mutex::new(sink),
            gate,
        }
    }

    /// Offset the next commit must start at. Equals the bytes durably
    /// handed to the sink so far.
    pub fn next_offset(&self) -> u64 {
        self.gate.borrow().next
    }

    /// Registers `part` as in flight before its bytes are fetched.
    ///
    /// After cancellation, later parts waiting to commit keep waiting for it
    /// until the reservation is dropped.
    pub fn reserve(&self, part: &Part) -> Reservation<'_> {
        self.gate.send_modify(|g| {
            g.in_flight.insert(part.offset);
        });
        Reservation {
            gate: &self.gate,
            offset: part.offset,
        }
    }

    /// Writes `bytes` for `part` once every earlier part has been written.
    ///
    /// Waits until the cursor reaches `part.offset`, appends, then advances
    /// the cursor by `part.length`. Returns the new cursor. A part already
    /// at the cursor is always written. If `cancel` fires while waiting, the
    /// commit gives up with [`TransferError::Cancelled`] as soon as no
    /// reserved part lies between the cursor and `part.offset`.
    pub async fn commit(
        &self,
        part: &Part,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        if bytes.len() as u64 != part.length {
            return Err(TransferError::PartLength {
                number: part.number,
                expected: part.length,
                got: bytes.len() as u64,
            });
        }

        let mut rx = self.gate.subscribe();
        let mut reached = tokio::select! {
            biased;
            res = rx.wait_for(|g| g.open_for(part.offset)) => res.is_ok(),
            _ = cancel.cancelled() => false,
        };
        if !reached {
            reached = match rx
                .wait_for(|g| g.open_for(part.offset) || !g.pending_before(part.offset))
                .await
            {
                Ok(gate) => gate.open_for(part.offset),
                Err(_) => false,
            };
        }
        if !reached {
            debug!(part = part.number, offset = part.offset, "commit abandoned");
            return Err(TransferError::Cancelled);
        }

        let mut sink = self.sink.lock().await;
        let cursor = self.next_offset();
        if cursor != part.offset {
            return Err(TransferError::OutOfOrder {
                offset: part.offset,
                cursor,
            });
        }

        sink.write_all(bytes).await?;
        sink.flush().await?;

        let advanced = part.end();
        self.gate.send_modify(|g| g.next = advanced);
        debug!(part = part.number, offset = part.offset, cursor = advanced, "part committed");
        Ok(advanced)
    }

    /// Flushes and returns the sink.
    pub async fn into_inner(self) -> Result<W, TransferError> {
        let mut sink = self.sink.into_inner();
        sink.flush().await?;
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn in_order_commits_append() {
        let writer = OrderedWriter::new(Vec::new(), 0);
        let cancel = CancellationToken::new();
        let src = data(10);

        for part in crate::planner::plan(10, 4, 0) {
            let range = part.offset as usize..part.end() as usize;
            writer.commit(&part, &src[range], &cancel).await.unwrap();
        }
        assert_eq!(writer.next_offset(), 10);
        assert_eq!(writer.into_inner().await.unwrap(), src);
    }

    #[tokio::test]
    async fn out_of_order_commits_are_reordered() {
        let src = data(103);
        let parts = crate::planner::plan(103, 10, 0);
        let writer = Arc::new(OrderedWriter::new(Vec::new(), 0));
        let cancel = CancellationToken::new();

        // Last part arrives first, first part arrives last.
        let count = parts.len() as u64;
        let mut handles = Vec::new();
        for part in parts {
            let writer = Arc::clone(&writer);
            let cancel = cancel.clone();
            let bytes = src[part.offset as usize..part.end() as usize].to_vec();
            let delay = Duration::from_millis((count - part.number as u64) * 5);
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                writer.commit(&part, &bytes, &cancel).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let writer = Arc::try_unwrap(writer).ok().unwrap();
        assert_eq!(writer.into_inner().await.unwrap(), src);
    }

    #[tokio::test]
    async fn resumed_writer_starts_at_offset() {
        let writer = OrderedWriter::new(Vec::new(), 6);
        let cancel = CancellationToken::new();
        let part = Part::new(1, 6, 3);
        assert_eq!(writer.commit(&part, b"abc", &cancel).await.unwrap(), 9);
        assert_eq!(writer.into_inner().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn waiting_commit_observes_cancellation() {
        let writer = Arc::new(OrderedWriter::new(Vec::new(), 0));
        let cancel = CancellationToken::new();

        let w = Arc::clone(&writer);
        let c = cancel.clone();
        let waiting = tokio::spawn(async move {
            let part = Part::new(2, 4, 4);
            w.commit(&part, b"EFGH", &c).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        cancel.cancel();
        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert_eq!(writer.next_offset(), 0);
    }

    #[tokio::test]
    async fn length_mismatch_rejected() {
        let writer = OrderedWriter::new(Vec::new(), 0);
        let result = writer
            .commit(&Part::new(1, 0, 4), b"abc", &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(TransferError::PartLength { number: 1, expected: 4, got: 3 })
        ));
    }

    #[tokio::test]
    async fn stale_commit_rejected() {
        let writer = OrderedWriter::new(Vec::new(), 0);
        let cancel = CancellationToken::new();
        writer.commit(&Part::new(1, 0, 2), b"ab", &cancel).await.unwrap();

        let result = writer.commit(&Part::new(1, 0, 2), b"ab", &cancel).await;
        assert!(matches!(
            result,
            Err(TransferError::OutOfOrder { offset: 0, cursor: 2 })
        ));
    }

    #[tokio::test]
    async fn part_at_cursor_is_written_after_cancellation() {
        let writer = OrderedWriter::new(Vec::new(), 0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let part = Part::new(1, 0, 3);
        assert_eq!(writer.commit(&part, b"abc", &cancel).await.unwrap(), 3);
        assert_eq!(writer.into_inner().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn waiter_outlives_cancellation_while_earlier_part_is_in_flight() {
        let writer = Arc::new(OrderedWriter::new(Vec::new(), 0));
        let cancel = CancellationToken::new();
        let first = Part::new(1, 0, 4);
        let second = Part::new(2, 4, 4);
        let slot = writer.reserve(&first);

        let w = Arc::clone(&writer);
        let c = cancel.clone();
        let waiting = tokio::spawn(async move {
            let _slot = w.reserve(&second);
            w.commit(&second, b"EFGH", &c).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        writer.commit(&first, b"ABCD", &cancel).await.unwrap();
        drop(slot);
        assert_eq!(waiting.await.unwrap().unwrap(), 8);

        let writer = Arc::try_unwrap(writer).ok().unwrap();
        assert_eq!(writer.into_inner().await.unwrap(), b"ABCDEFGH");
    }

    #[tokio::test]
    async fn waiter_gives_up_when_earlier_part_is_released() {
        let writer = Arc::new(OrderedWriter::new(Vec::new(), 0));
        let cancel = CancellationToken::new();
        let slot = writer.reserve(&Part::new(1, 0, 4));

        let w = Arc::clone(&writer);
        let c = cancel.clone();
        let waiting = tokio::spawn(async move {
            let part = Part::new(2, 4, 4);
            w.commit(&part, b"EFGH", &c).await
        });

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        // The earlier part failed without committing.
        drop(slot);
        assert!(matches!(waiting.await.unwrap(), Err(TransferError::Cancelled)));
        assert_eq!(writer.next_offset(), 0);
    }
}
