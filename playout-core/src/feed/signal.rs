//! Low-watermark signalling from the sink to the feed controller.
//!
//! The channel holds a single slot. The sink posts with `try_send` and a
//! signal that finds the slot occupied is dropped: the next tick will
//! re-check the fill level anyway.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::FeedSlot;
use crate::session::SessionShared;

/// Fill level observed by the sink when it crossed the low watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkSignal {
    /// Samples buffered at the time of the signal.
    pub available: usize,
    /// Ring capacity in samples.
    pub capacity: usize,
}

/// Sink side of the watermark channel.
#[derive(Debug, Clone)]
pub struct WatermarkSender {
    tx: mpsc::Sender<WatermarkSignal>,
}

pub type WatermarkReceiver = mpsc::Receiver<WatermarkSignal>;

/// Create the single-slot watermark channel.
pub fn watermark_channel() -> (WatermarkSender, WatermarkReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (WatermarkSender { tx }, rx)
}

impl WatermarkSender {
    /// Post a signal without waiting. Returns `false` if a signal is already
    /// pending or the receiver is gone.
    pub fn notify(&self, signal: WatermarkSignal) -> bool {
        self.tx.try_send(signal).is_ok()
    }
}

/// Forward watermark signals to whichever feed controller is currently
/// installed in `slot`. Signals arriving with no controller installed, or
/// while a refill is in flight, are counted as dropped.
pub fn spawn_signal_loop(
    slot: FeedSlot,
    session: Arc<SessionShared>,
    mut rx: WatermarkReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            let accepted = match slot.current() {
                Some(controller) => controller.on_low_watermark(signal),
                None => false,
            };
            if !accepted {
                session.count_signal_dropped();
                debug!(
                    available = signal.available,
                    capacity = signal.capacity,
                    "Watermark signal dropped"
                );
            }
        }
        info!("Watermark channel closed, signal loop exiting");
    })
}
