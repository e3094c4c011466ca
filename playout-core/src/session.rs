//! State shared between the control surface, the feed controller and the
//! real-time sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::audio::ring_buffer::TransferRing;
use crate::audio::state::{PlaybackState, PlaybackStateMachine};

/// Everything both timing domains touch. Held behind an `Arc`.
#[derive(Debug)]
pub struct SessionShared {
    pub(crate) state: PlaybackStateMachine,
    pub(crate) ring: TransferRing,
    sample_rate: u32,
    /// Frames delivered to the sink since the last stop.
    position_frames: AtomicU64,
    /// Set once the source adapter reports end-of-stream.
    end_of_stream: AtomicBool,
    /// Low-watermark signals the sink posted.
    signals_sent: AtomicU64,
    /// Low-watermark signals dropped because one was already pending or a
    /// refill was in flight.
    signals_dropped: AtomicU64,
}

impl SessionShared {
    pub fn new(ring: TransferRing, sample_rate: u32) -> Self {
        Self {
            state: PlaybackStateMachine::new(),
            ring,
            sample_rate,
            position_frames: AtomicU64::new(0),
            end_of_stream: AtomicBool::new(false),
            signals_sent: AtomicU64::new(0),
            signals_dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state.current_state()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn position_frames(&self) -> u64 {
        self.position_frames.load(Ordering::Acquire)
    }

    pub(crate) fn advance_position(&self, frames: usize) {
        self.position_frames
            .fetch_add(frames as u64, Ordering::AcqRel);
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    pub(crate) fn mark_end_of_stream(&self) {
        self.end_of_stream.store(true, Ordering::Release);
    }

    pub fn signals_sent(&self) -> u64 {
        self.signals_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn count_signal_sent(&self) {
        self.signals_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signals_dropped(&self) -> u64 {
        self.signals_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn count_signal_dropped(&self) {
        self.signals_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Clear buffered audio, position and end-of-stream.
    ///
    /// Clearing the ring starts a new generation, so a refill burst that
    /// began before this call can no longer push into it.
    pub(crate) fn reset_transient(&self) {
        self.ring.clear();
        self.position_frames.store(0, Ordering::Release);
        self.end_of_stream.store(false, Ordering::Release);
    }
}
