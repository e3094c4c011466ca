//! Feed controller: keeps the transfer ring topped up from the source.
//!
//! Refills are bursts of pull cycles. A burst is started either by the
//! priming step of `play()` or by a low-watermark signal from the sink, and
//! both go through [`FeedController::refill`]. At most one burst runs at a
//! time; the in-flight marker is a ticket cleared by a drop guard, so a
//! panicking or cancelled burst can never leave it set.

pub mod signal;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::audio::adapter::SourceAdapter;
use crate::config::PlayoutConfig;
use crate::session::SessionShared;
use signal::WatermarkSignal;

/// Tuning knobs for refill bursts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedConfig {
    /// Samples requested from the adapter per cycle.
    pub chunk_size: usize,
    /// Upper bound on cycles in one watermark-triggered burst.
    pub max_cycles_per_signal: usize,
    /// Cycles run unconditionally when playback starts.
    pub priming_cycles: usize,
    /// Target fill fraction of a watermark-triggered burst.
    pub high_watermark: f32,
}

impl From<&PlayoutConfig> for FeedConfig {
    fn from(config: &PlayoutConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_cycles_per_signal: config.max_cycles_per_signal,
            priming_cycles: config.priming_cycles,
            high_watermark: config.high_watermark,
        }
    }
}

/// What started a refill burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillTrigger {
    Priming,
    Watermark,
}

impl std::fmt::Display for RefillTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Priming => write!(f, "priming"),
            Self::Watermark => write!(f, "watermark"),
        }
    }
}

/// Summary of one refill burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillOutcome {
    pub cycles_run: usize,
    pub samples_pushed: usize,
    pub end_of_stream: bool,
    /// The burst stopped early because of `stop()` or `pause()`.
    pub cancelled: bool,
}

pub struct FeedController {
    session: Arc<SessionShared>,
    adapter: Mutex<SourceAdapter>,
    config: FeedConfig,
    /// Ticket of the running burst, 0 when idle.
    in_flight: AtomicU64,
    next_ticket: AtomicU64,
    refills: AtomicU64,
    source_errors: AtomicU64,
}

/// Holds the in-flight marker; clears it on drop if it still owns it.
pub struct InFlightGuard {
    controller: Arc<FeedController>,
    ticket: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let _ = self.controller.in_flight.compare_exchange(
            self.ticket,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl FeedController {
    /// `adapter` must already be initialized to the sink's format.
    pub fn new(session: Arc<SessionShared>, adapter: SourceAdapter, config: FeedConfig) -> Self {
        Self {
            session,
            adapter: Mutex::new(adapter),
            config,
            in_flight: AtomicU64::new(0),
            next_ticket: AtomicU64::new(0),
            refills: AtomicU64::new(0),
            source_errors: AtomicU64::new(0),
        }
    }

    /// Claim the in-flight marker. `None` if a burst is already running.
    fn try_begin(self: &Arc<Self>) -> Option<InFlightGuard> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        self.in_flight
            .compare_exchange(0, ticket, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                controller: Arc::clone(self),
                ticket,
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) != 0
    }

    /// Force the marker free. The running burst, if any, is expected to be
    /// cancelled through the ring generation.
    pub fn release_in_flight(&self) {
        self.in_flight.store(0, Ordering::Release);
    }

    /// Completed refill bursts, priming included.
    pub fn refills(&self) -> u64 {
        self.refills.load(Ordering::Relaxed)
    }

    pub fn source_errors(&self) -> u64 {
        self.source_errors.load(Ordering::Relaxed)
    }

    /// Cycles needed to bring `signal.available` up to the high watermark.
    pub fn cycles_for(&self, signal: WatermarkSignal) -> usize {
        let target = (signal.capacity as f64 * self.config.high_watermark as f64).floor() as usize;
        let missing = target.saturating_sub(signal.available);
        missing
            .div_ceil(self.config.chunk_size.max(1))
            .clamp(1, self.config.max_cycles_per_signal.max(1))
    }

    /// Run the priming burst on the calling thread.
    ///
    /// Returns `None` if another burst holds the marker.
    pub fn prime(self: &Arc<Self>) -> Option<RefillOutcome> {
        let _guard = self.try_begin()?;
        let generation = self.session.ring.generation();
        Some(self.refill(self.config.priming_cycles, RefillTrigger::Priming, generation))
    }

    /// Handle a low-watermark signal from the sink.
    ///
    /// Returns `true` if a refill burst was started on the blocking pool,
    /// `false` if the signal was dropped. Must be called inside a tokio
    /// runtime.
    pub fn on_low_watermark(self: &Arc<Self>, signal: WatermarkSignal) -> bool {
        if !self.session.state.is_playing() || self.session.end_of_stream() {
            return false;
        }
        let Some(guard) = self.try_begin() else {
            return false;
        };

        let generation = self.session.ring.generation();
        let cycles = self.cycles_for(signal);
        tokio::task::spawn_blocking(move || {
            guard
                .controller
                .refill(cycles, RefillTrigger::Watermark, generation);
            drop(guard);
        });
        true
    }

    /// Pull up to `cycles` chunks and push each into the ring.
    ///
    /// Checked before every cycle: a `clear()` since `generation` cancels
    /// the burst, and so does leaving `Playing` for watermark bursts.
    /// A source error ends the burst; the next signal retries.
    fn refill(&self, cycles: usize, trigger: RefillTrigger, generation: u64) -> RefillOutcome {
        let session = &self.session;
        let mut outcome = RefillOutcome::default();
        let mut adapter = self.lock_adapter();

        for _ in 0..cycles {
            if session.ring.generation() != generation
                || (trigger == RefillTrigger::Watermark && !session.state.is_playing())
            {
                outcome.cancelled = true;
                break;
            }

            match adapter.pull(self.config.chunk_size) {
                Ok(pulled) if pulled.end_of_stream => {
                    // Under the ring lock, so a concurrent stop() either
                    // clears the flag afterwards or makes this a no-op.
                    if session
                        .ring
                        .if_generation(generation, || session.mark_end_of_stream())
                    {
                        outcome.end_of_stream = true;
                    } else {
                        outcome.cancelled = true;
                    }
                    break;
                }
                Ok(pulled) => match session.ring.write_for(generation, pulled.samples) {
                    Some(written) => outcome.samples_pushed += written,
                    None => {
                        outcome.cancelled = true;
                        break;
                    }
                },
                Err(e) => {
                    self.source_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(%trigger, error = %e, "Source pull failed, ending refill burst");
                    outcome.cycles_run += 1;
                    break;
                }
            }
            outcome.cycles_run += 1;
        }

        self.refills.fetch_add(1, Ordering::Relaxed);
        debug!(
            %trigger,
            cycles = outcome.cycles_run,
            requested = cycles,
            pushed = outcome.samples_pushed,
            available = session.ring.available(),
            eos = outcome.end_of_stream,
            cancelled = outcome.cancelled,
            "Refill burst finished"
        );
        outcome
    }

    fn lock_adapter(&self) -> MutexGuard<'_, SourceAdapter> {
        self.adapter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// The controller of the current session, shared with the signal loop.
/// Empty while no source is initialized.
#[derive(Clone, Default)]
pub struct FeedSlot {
    inner: Arc<Mutex<Option<Arc<FeedController>>>>,
}

impl FeedSlot {
    pub fn install(&self, controller: Arc<FeedController>) {
        *self.lock() = Some(controller);
    }

    pub fn current(&self) -> Option<Arc<FeedController>> {
        self.lock().clone()
    }

    pub fn take(&self) -> Option<Arc<FeedController>> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<FeedController>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
