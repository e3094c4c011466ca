//! Buffer health reporting.
//!
//! The sink callback must not log or block, so it pushes periodic
//! `SinkReport`s into a lock-free `ringbuf` SPSC queue and drops them when
//! the queue is full. An async task drains the queue and logs.

use std::time::Duration;

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::audio::state::PlaybackState;

/// Reports buffered before the sink starts dropping them.
pub const REPORT_QUEUE_CAPACITY: usize = 64;

/// How often the logger task drains the report queue.
pub const REPORT_LOG_INTERVAL: Duration = Duration::from_millis(250);

/// Fill level and error counters, sampled by the sink every few ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkReport {
    pub tick: u64,
    pub available: usize,
    pub capacity: usize,
    pub underrun_count: u64,
    pub overflow_count: u64,
    pub contended_reads: u64,
}

/// Producer half, owned by the audio callback.
pub struct SinkReporter {
    inner: ringbuf::HeapProd<SinkReport>,
}

/// Consumer half, drained by the logger task.
pub struct SinkReports {
    inner: ringbuf::HeapCons<SinkReport>,
}

/// Create a matched reporter/reader pair.
pub fn sink_report_channel(capacity: usize) -> (SinkReporter, SinkReports) {
    let rb = HeapRb::<SinkReport>::new(capacity.max(1));
    let (prod, cons) = rb.split();
    (SinkReporter { inner: prod }, SinkReports { inner: cons })
}

impl SinkReporter {
    /// Queue a report. Returns `false` if the queue was full and the report
    /// was dropped.
    pub fn report(&mut self, report: SinkReport) -> bool {
        self.inner.try_push(report).is_ok()
    }
}

impl SinkReports {
    pub fn pop(&mut self) -> Option<SinkReport> {
        self.inner.try_pop()
    }

    /// Drain everything queued, keeping only the newest report.
    pub fn drain_latest(&mut self) -> Option<SinkReport> {
        let mut latest = None;
        while let Some(report) = self.inner.try_pop() {
            latest = Some(report);
        }
        latest
    }
}

/// Spawn the task that logs sink reports. Underrun growth is a warning,
/// everything else is debug output.
pub fn spawn_report_logger(mut reports: SinkReports, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_underruns = 0u64;

        loop {
            ticker.tick().await;
            let Some(report) = reports.drain_latest() else {
                continue;
            };

            let fill = report.available as f64 / report.capacity.max(1) as f64;
            if report.underrun_count > last_underruns {
                warn!(
                    tick = report.tick,
                    new_underruns = report.underrun_count - last_underruns,
                    fill = format!("{:.2}", fill),
                    "Sink underran"
                );
            } else {
                debug!(
                    tick = report.tick,
                    available = report.available,
                    capacity = report.capacity,
                    underruns = report.underrun_count,
                    overflows = report.overflow_count,
                    contended = report.contended_reads,
                    "Buffer health"
                );
            }
            last_underruns = report.underrun_count;
        }
    })
}

/// Point-in-time snapshot of the pipeline, for the control surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStats {
    pub state: PlaybackState,
    pub available: usize,
    pub capacity: usize,
    pub fill_ratio: f32,
    pub underrun_count: u64,
    pub overflow_count: u64,
    /// Sink ticks served as silence because a refill held the ring lock.
    pub contended_reads: u64,
    pub position_samples: u64,
    pub refills: u64,
    pub source_errors: u64,
    pub signals_sent: u64,
    pub signals_dropped: u64,
    pub end_of_stream: bool,
}
