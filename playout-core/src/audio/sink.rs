//! Real-time sink: the body of the audio device callback.
//!
//! Each tick drains one block from the transfer ring. Nothing here blocks,
//! allocates or logs: the ring is read with `try_lock`, watermark signals
//! go out with `try_send` and diagnostics with a lock-free `try_push`.

use std::sync::Arc;

use crate::diagnostics::{SinkReport, SinkReporter};
use crate::feed::signal::{WatermarkSender, WatermarkSignal};
use crate::session::SessionShared;

pub struct RealtimeSink {
    session: Arc<SessionShared>,
    signals: WatermarkSender,
    reporter: SinkReporter,
    /// Low watermark in samples.
    low_mark: usize,
    stats_stride: u64,
    ticks: u64,
}

impl RealtimeSink {
    pub fn new(
        session: Arc<SessionShared>,
        signals: WatermarkSender,
        reporter: SinkReporter,
        low_watermark: f32,
        stats_stride: u32,
    ) -> Self {
        let low_mark = (session.ring.capacity() as f64 * low_watermark as f64).floor() as usize;
        Self {
            session,
            signals,
            reporter,
            low_mark,
            stats_stride: stats_stride.max(1) as u64,
            ticks: 0,
        }
    }

    /// Fill `out` (interleaved, whole frames) for one device period.
    pub fn on_tick(&mut self, out: &mut [f32]) {
        self.ticks += 1;
        let session = &self.session;

        if !session.state.is_playing() {
            out.fill(0.0);
            return;
        }

        let ring = &session.ring;
        let generation = ring.generation();
        let before = ring.available();
        let frames = ring.read(out);
        // A stop() between the two generation loads has already reset the
        // position; don't count frames from the old session.
        if frames > 0 && ring.generation() == generation {
            session.advance_position(frames);
        }
        let after = ring.available();

        if !session.end_of_stream() && (before < self.low_mark || after < self.low_mark) {
            let signal = WatermarkSignal {
                available: after,
                capacity: ring.capacity(),
            };
            if self.signals.notify(signal) {
                session.count_signal_sent();
            } else {
                session.count_signal_dropped();
            }
        }

        if self.ticks % self.stats_stride == 0 {
            self.reporter.report(SinkReport {
                tick: self.ticks,
                available: after,
                capacity: ring.capacity(),
                underrun_count: ring.underrun_count(),
                overflow_count: ring.overflow_count(),
                contended_reads: ring.contended_reads(),
            });
        }
    }
}
