use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::types::{Direction, TransferEvent};

/// Default minimum interval between progress reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(500);

const THROUGHPUT_SPAN: Duration = Duration::from_secs(5);

/// Point-in-time view of a running transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub key: String,
    pub direction: Option<Direction>,
    /// Bytes this call planned to move.
    pub total_bytes: u64,
    /// Bytes already present before this call (downloads).
    pub start_offset: u64,
    pub bytes_moved: u64,
    pub parts_total: usize,
    pub parts_done: usize,
    pub parts_skipped: usize,
    pub parts_failed: usize,
    /// Recent throughput in bytes/second.
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
    pub finished: bool,
}

impl ProgressSnapshot {
    /// Completed share of the planned parts, from 0.0 to 100.0.
    pub fn percent(&self) -> f64 {
        if self.parts_total == 0 {
            return if self.finished { 100.0 } else { 0.0 };
        }
        (self.parts_done + self.parts_skipped) as f64 * 100.0 / self.parts_total as f64
    }
}

/// Folds [`TransferEvent`]s into a [`ProgressSnapshot`].
///
/// Reports are throttled: [`apply`](Self::apply) returns `true` only when
/// the interval has elapsed or the transfer reached a terminal state.
pub struct ProgressTracker {
    snapshot: ProgressSnapshot,
    speed: ThroughputWindow,
    interval: Duration,
    last_report: Option<Instant>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProgressTracker {
    /// Creates a tracker. If `interval` is `None`, defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            snapshot: ProgressSnapshot::default(),
            speed: ThroughputWindow::new(THROUGHPUT_SPAN),
            interval: interval.unwrap_or(DEFAULT_REPORT_INTERVAL),
            last_report: None,
        }
    }

    /// Applies one event. Returns `true` when a report is due.
    pub fn apply(&mut self, event: &TransferEvent) -> bool {
        let s = &mut self.snapshot;
        let terminal = match event {
            TransferEvent::Planned {
                key,
                direction,
                parts,
                total_bytes,
                start_offset,
            } => {
                *s = ProgressSnapshot {
                    key: key.clone(),
                    direction: Some(*direction),
                    total_bytes: *total_bytes,
                    start_offset: *start_offset,
                    parts_total: *parts,
                    ..ProgressSnapshot::default()
                };
                self.speed.clear();
                false
            }
            TransferEvent::PartSkipped { length, .. } => {
                s.parts_skipped += 1;
                s.total_bytes = s.total_bytes.saturating_sub(*length);
                false
            }
            TransferEvent::PartStarted { .. } => false,
            TransferEvent::PartCompleted { bytes_moved, .. } => {
                s.parts_done += 1;
                s.bytes_moved = *bytes_moved;
                false
            }
            TransferEvent::PartFailed { .. } => {
                s.parts_failed += 1;
                false
            }
            TransferEvent::Finalizing { .. } => false,
            TransferEvent::Completed { .. }
            | TransferEvent::AlreadyComplete
            | TransferEvent::Aborted { .. } => {
                s.finished = true;
                true
            }
        };

        let now = Instant::now();
        if let TransferEvent::PartCompleted { length, .. } = event {
            self.speed.record(now, *length);
        }
        s.bytes_per_second = self.speed.bytes_per_second();
        s.eta = self
            .speed
            .eta(s.total_bytes.saturating_sub(s.bytes_moved));

        let due = terminal
            || self
                .last_report
                .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.last_report = Some(now);
        }
        due
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }
}

/// Throughput over a sliding time window.
///
/// Samples are cumulative byte counts, so the rate is the difference between
/// the newest and oldest retained sample divided by the time between them.
struct ThroughputWindow {
    samples: VecDeque<(Instant, u64)>,
    span: Duration,
    moved: u64,
}

impl ThroughputWindow {
    fn new(span: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            span,
            moved: 0,
        }
    }

    fn record(&mut self, at: Instant, bytes: u64) {
        self.moved += bytes;
        if self.samples.is_empty() {
            // Anchor at zero so the first part counts towards the rate.
            self.samples.push_back((at, self.moved - bytes));
        }
        self.samples.push_back((at, self.moved));
        while self.samples.len() > 2 {
            match self.samples.front() {
                Some((t, _)) if at.duration_since(*t) > self.span => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
    }

    fn bytes_per_second(&self) -> f64 {
        let (Some((t0, b0)), Some((t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.duration_since(*t0);
        if elapsed.is_zero() {
            return 0.0;
        }
        (b1 - b0) as f64 / elapsed.as_secs_f64()
    }

    fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.moved = 0;
    }
}
