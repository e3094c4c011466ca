//! Control surface of the playout engine.
//!
//! A `Player` owns the transfer ring for the lifetime of the output device.
//! `init` attaches a source and builds a fresh feed controller, `stop`
//! tears it down again. All control calls are cheap and non-blocking.
//! `play()` from `Stopped` awaits the priming burst, which runs on the
//! blocking pool.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::adapter::SourceAdapter;
use crate::audio::output::{start_output, SendStream};
use crate::audio::ring_buffer::TransferRing;
use crate::audio::sink::RealtimeSink;
use crate::audio::source::SampleSource;
use crate::audio::state::PlaybackState;
use crate::config::PlayoutConfig;
use crate::diagnostics::{
    sink_report_channel, spawn_report_logger, PlaybackStats, REPORT_LOG_INTERVAL,
    REPORT_QUEUE_CAPACITY,
};
use crate::feed::signal::{spawn_signal_loop, watermark_channel};
use crate::feed::{FeedConfig, FeedController, FeedSlot};
use crate::session::SessionShared;

/// Playback position, in time and in interleaved samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub ms: f64,
    pub samples: u64,
}

pub struct Player {
    config: PlayoutConfig,
    session: Arc<SessionShared>,
    feed: FeedSlot,
    /// Orders `init`/`stop` against the end of priming.
    control: Mutex<()>,
    signal_task: JoinHandle<()>,
    report_task: JoinHandle<()>,
    _output: Option<SendStream>,
}

impl Player {
    /// Build a player without an audio device. The returned sink must be
    /// ticked by the caller.
    ///
    /// Spawns the signal loop and report logger, so it must be called from
    /// within a tokio runtime.
    pub fn new(config: PlayoutConfig) -> anyhow::Result<(Self, RealtimeSink)> {
        config.validate()?;

        let ring = TransferRing::new(config.ring_capacity, config.channels as usize)?;
        let session = Arc::new(SessionShared::new(ring, config.sample_rate));
        let feed = FeedSlot::default();

        let (signals, signal_rx) = watermark_channel();
        let (reporter, reports) = sink_report_channel(REPORT_QUEUE_CAPACITY);
        let sink = RealtimeSink::new(
            Arc::clone(&session),
            signals,
            reporter,
            config.low_watermark,
            config.stats_stride,
        );

        let signal_task = spawn_signal_loop(feed.clone(), Arc::clone(&session), signal_rx);
        let report_task = spawn_report_logger(reports, REPORT_LOG_INTERVAL);

        info!(
            capacity = session.ring.capacity(),
            requested = config.ring_capacity,
            sample_rate = config.sample_rate,
            channels = config.channels,
            "Player created"
        );

        let player = Self {
            config,
            session,
            feed,
            control: Mutex::new(()),
            signal_task,
            report_task,
            _output: None,
        };
        Ok((player, sink))
    }

    /// Build a player driven by the configured output device.
    pub fn open_output(config: PlayoutConfig) -> anyhow::Result<Self> {
        let (mut player, sink) = Self::new(config)?;
        let stream = start_output(sink, &player.config)?;
        player._output = Some(stream);
        Ok(player)
    }

    pub fn config(&self) -> &PlayoutConfig {
        &self.config
    }

    pub fn state(&self) -> PlaybackState {
        self.session.state()
    }

    /// Whether a source has been attached since the last stop.
    pub fn is_initialized(&self) -> bool {
        self.feed.current().is_some()
    }

    /// Whether a refill burst is running right now.
    pub fn is_refilling(&self) -> bool {
        self.feed
            .current()
            .map(|c| c.is_in_flight())
            .unwrap_or(false)
    }

    /// Attach `source` for the next session. Only valid while stopped.
    pub fn init(&self, source: Box<dyn SampleSource>) -> bool {
        let _control = self.lock_control();
        let state = self.session.state();
        if state != PlaybackState::Stopped {
            warn!(%state, "Init rejected: player is not stopped");
            return false;
        }

        let mut adapter = SourceAdapter::new(source);
        if let Err(e) = adapter.init(self.config.sample_rate, self.config.channels) {
            warn!(error = %e, "Source initialization failed");
            self.drop_controller();
            return false;
        }

        self.drop_controller();
        self.session.reset_transient();

        let name = adapter.source_name();
        let controller = FeedController::new(
            Arc::clone(&self.session),
            adapter,
            FeedConfig::from(&self.config),
        );
        self.feed.install(Arc::new(controller));
        info!(source = %name, "Source attached");
        true
    }

    /// Start playback, or resume it when paused.
    ///
    /// From `Stopped` this needs a prior [`init`](Self::init) and primes the
    /// ring before the sink starts draining it. The priming burst runs on
    /// the blocking pool; the state stays `Stopped` until it has finished.
    /// A `stop()` or `init()` in the meantime makes this return `false`.
    pub async fn play(&self) -> bool {
        match self.session.state() {
            PlaybackState::Playing => {
                debug!("Play ignored: already playing");
                false
            }
            PlaybackState::Paused => self.resume(),
            PlaybackState::Stopped => self.prime_and_start().await,
        }
    }

    async fn prime_and_start(&self) -> bool {
        let Some(controller) = self.feed.current() else {
            warn!("Play rejected: no source initialized");
            return false;
        };
        let generation = self.session.ring.generation();

        let primer = Arc::clone(&controller);
        match tokio::task::spawn_blocking(move || primer.prime()).await {
            Ok(Some(outcome)) => info!(
                cycles = outcome.cycles_run,
                pushed = outcome.samples_pushed,
                available = self.session.ring.available(),
                eos = outcome.end_of_stream,
                cancelled = outcome.cancelled,
                "Priming finished"
            ),
            Ok(None) => {
                warn!("Play rejected: priming already in progress");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Play rejected: priming task failed");
                return false;
            }
        }

        let _control = self.lock_control();
        let same_session = self.session.ring.generation() == generation
            && self
                .feed
                .current()
                .is_some_and(|current| Arc::ptr_eq(&current, &controller));
        if !same_session {
            warn!("Play rejected: stopped during priming");
            return false;
        }
        if !self.session.state.start() {
            warn!(state = %self.session.state(), "Play rejected: state changed during priming");
            return false;
        }
        info!("Playback started");
        true
    }

    pub fn pause(&self) -> bool {
        if self.session.state.pause() {
            info!("Playback paused");
            true
        } else {
            warn!(state = %self.session.state(), "Pause ignored: not playing");
            false
        }
    }

    pub fn resume(&self) -> bool {
        if self.session.state.resume() {
            info!("Playback resumed");
            true
        } else {
            warn!(state = %self.session.state(), "Resume ignored: not paused");
            false
        }
    }

    /// Stop from any state. Clears the ring, position and end-of-stream and
    /// detaches the source. Calling it again changes nothing.
    ///
    /// Returns the state playback was in.
    pub fn stop(&self) -> PlaybackState {
        let _control = self.lock_control();
        let previous = self.session.state.stop();
        self.drop_controller();
        self.session.reset_transient();
        if previous != PlaybackState::Stopped {
            info!(%previous, "Playback stopped");
        }
        previous
    }

    /// Playback position in milliseconds. See [`position`](Self::position).
    pub fn position_ms(&self) -> f64 {
        self.position().ms
    }

    /// Interleaved samples delivered since playback started. See
    /// [`position`](Self::position).
    pub fn position_samples(&self) -> u64 {
        self.position().samples
    }

    /// Delivered audio since playback started.
    ///
    /// Once the source has ended and the ring is drained, this stops
    /// playback. The position reported is the one from before the stop.
    pub fn position(&self) -> Position {
        let frames = self.session.position_frames();
        if self.session.end_of_stream()
            && self.session.state() == PlaybackState::Playing
            && self.session.ring.available() == 0
        {
            info!(frames, "End of stream reached, stopping");
            self.stop();
        }
        Position {
            ms: frames as f64 * 1000.0 / self.session.sample_rate() as f64,
            samples: frames * self.session.ring.channels() as u64,
        }
    }

    pub fn stats(&self) -> PlaybackStats {
        let ring = &self.session.ring;
        let controller = self.feed.current();
        PlaybackStats {
            state: self.session.state(),
            available: ring.available(),
            capacity: ring.capacity(),
            fill_ratio: ring.fill_ratio(),
            underrun_count: ring.underrun_count(),
            overflow_count: ring.overflow_count(),
            contended_reads: ring.contended_reads(),
            position_samples: self.session.position_frames() * ring.channels() as u64,
            refills: controller.as_ref().map(|c| c.refills()).unwrap_or(0),
            source_errors: controller.as_ref().map(|c| c.source_errors()).unwrap_or(0),
            signals_sent: self.session.signals_sent(),
            signals_dropped: self.session.signals_dropped(),
            end_of_stream: self.session.end_of_stream(),
        }
    }

    fn drop_controller(&self) {
        if let Some(controller) = self.feed.take() {
            controller.release_in_flight();
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.session.state.stop();
        self.signal_task.abort();
        self.report_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::audio::source::{ClipSource, SineTone, SourceFormat};

    const STEREO: SourceFormat = SourceFormat {
        sample_rate: 44_100,
        channels: 2,
    };

    fn small_config() -> PlayoutConfig {
        PlayoutConfig {
            ring_capacity: 4096,
            ..PlayoutConfig::default()
        }
    }

    fn tone() -> Box<dyn SampleSource> {
        Box::new(SineTone::test_tone(STEREO))
    }

    /// Tone that blocks every read until the gate opens.
    struct GatedSource {
        gate: Arc<AtomicBool>,
        tone: SineTone,
    }

    impl SampleSource for GatedSource {
        fn format(&self) -> SourceFormat {
            STEREO
        }

        fn read(&mut self, buf: &mut [f32]) -> anyhow::Result<usize> {
            while !self.gate.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.tone.read(buf)
        }

        fn name(&self) -> String {
            "gated".into()
        }
    }

    fn gated() -> (Box<dyn SampleSource>, Arc<AtomicBool>) {
        let gate = Arc::new(AtomicBool::new(false));
        let source = GatedSource {
            gate: Arc::clone(&gate),
            tone: SineTone::test_tone(STEREO),
        };
        (Box::new(source), gate)
    }

    fn spawn_play(player: &Arc<Player>) -> tokio::task::JoinHandle<bool> {
        let player = Arc::clone(player);
        tokio::spawn(async move { player.play().await })
    }

    async fn wait_refilling(player: &Player) {
        for _ in 0..200 {
            if player.is_refilling() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("priming never started");
    }

    #[tokio::test]
    async fn test_play_without_init_is_rejected() {
        let (player, _sink) = Player::new(small_config()).unwrap();
        assert!(!player.play().await);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(!player.is_initialized());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = PlayoutConfig {
            low_watermark: 0.9,
            ..small_config()
        };
        assert!(Player::new(config).is_err());
    }

    #[tokio::test]
    async fn test_play_primes_before_starting() {
        let (player, _sink) = Player::new(small_config()).unwrap();
        assert!(player.init(tone()));
        assert!(player.play().await);

        let stats = player.stats();
        assert_eq!(stats.state, PlaybackState::Playing);
        assert!(stats.available >= 3482);
        assert_eq!(stats.refills, 1);
        assert_eq!(stats.position_samples, 0);
    }

    #[tokio::test]
    async fn test_default_config_delivers_first_frame() {
        let (player, mut sink) = Player::new(PlayoutConfig::default()).unwrap();
        // Frame i holds the value i on both channels.
        let ramp: Vec<f32> = (0..20_000).flat_map(|i| [i as f32, i as f32]).collect();
        assert!(player.init(Box::new(ClipSource::new(ramp, STEREO))));
        assert!(player.play().await);

        let mut out = vec![-1.0f32; 8];
        sink.on_tick(&mut out);
        assert_eq!(out, [0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        assert_eq!(player.stats().overflow_count, 0);
    }

    #[tokio::test]
    async fn test_priming_runs_off_the_runtime() {
        let player = Arc::new(Player::new(small_config()).unwrap().0);
        let (source, gate) = gated();
        assert!(player.init(source));

        // The runtime keeps running this task while priming is blocked.
        let play = spawn_play(&player);
        wait_refilling(&player).await;
        assert_eq!(player.state(), PlaybackState::Stopped);

        gate.store(true, Ordering::Release);
        assert!(play.await.unwrap());
        assert_eq!(player.state(), PlaybackState::Playing);
        assert!(player.stats().available >= 3482);
        assert!(!player.is_refilling());
    }

    #[tokio::test]
    async fn test_stop_during_priming_rejects_play() {
        let player = Arc::new(Player::new(small_config()).unwrap().0);
        let (source, gate) = gated();
        assert!(player.init(source));

        let play = spawn_play(&player);
        wait_refilling(&player).await;
        assert_eq!(player.stop(), PlaybackState::Stopped);
        gate.store(true, Ordering::Release);

        assert!(!play.await.unwrap());
        assert_eq!(player.state(), PlaybackState::Stopped);
        let stats = player.stats();
        assert_eq!(stats.available, 0);
        assert!(!stats.end_of_stream);
    }

    #[tokio::test]
    async fn test_second_play_during_priming_is_rejected() {
        let player = Arc::new(Player::new(small_config()).unwrap().0);
        let (source, gate) = gated();
        assert!(player.init(source));

        let first = spawn_play(&player);
        wait_refilling(&player).await;
        assert!(!player.play().await);

        gate.store(true, Ordering::Release);
        assert!(first.await.unwrap());
        assert_eq!(player.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_pause_only_from_playing() {
        let (player, _sink) = Player::new(small_config()).unwrap();
        assert!(!player.pause());
        assert!(player.init(tone()));
        assert!(!player.pause());

        assert!(player.play().await);
        assert!(player.pause());
        assert_eq!(player.state(), PlaybackState::Paused);
        assert!(!player.pause());

        // Resuming keeps the buffered audio and does not prime again.
        let available = player.stats().available;
        assert!(player.play().await);
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.stats().available, available);
        assert_eq!(player.stats().refills, 1);
    }

    #[tokio::test]
    async fn test_init_rejected_unless_stopped() {
        let (player, _sink) = Player::new(small_config()).unwrap();
        assert!(player.init(tone()));
        assert!(player.play().await);
        assert!(!player.init(tone()));

        player.pause();
        assert!(!player.init(tone()));

        player.stop();
        assert!(player.init(tone()));
    }

    #[tokio::test]
    async fn test_init_rejects_broken_source() {
        let (player, _sink) = Player::new(small_config()).unwrap();
        let broken = ClipSource::new(vec![], SourceFormat::new(0, 2));
        assert!(!player.init(Box::new(broken)));
        assert!(!player.is_initialized());
        assert!(!player.play().await);
    }

    #[tokio::test]
    async fn test_stop_resets_and_is_idempotent() {
        let (player, mut sink) = Player::new(small_config()).unwrap();
        assert!(player.init(tone()));
        assert!(player.play().await);

        let mut out = vec![0.0f32; 1024];
        sink.on_tick(&mut out);
        assert!(player.position_samples() > 0);

        assert_eq!(player.stop(), PlaybackState::Playing);
        let once = player.stats();
        assert_eq!(once.state, PlaybackState::Stopped);
        assert_eq!(once.available, 0);
        assert_eq!(once.position_samples, 0);
        assert!(!once.end_of_stream);
        assert!(!player.is_refilling());

        assert_eq!(player.stop(), PlaybackState::Stopped);
        let twice = player.stats();
        assert_eq!(twice.state, once.state);
        assert_eq!(twice.available, once.available);
        assert_eq!(twice.position_samples, once.position_samples);

        // The source is detached by stop.
        assert!(!player.play().await);
    }

    #[tokio::test]
    async fn test_position_ms() {
        let (player, mut sink) = Player::new(small_config()).unwrap();
        assert!(player.init(tone()));
        assert!(player.play().await);

        // 441 stereo frames = 10 ms at 44.1 kHz.
        let mut out = vec![0.0f32; 882];
        sink.on_tick(&mut out);
        assert!((player.position_ms() - 10.0).abs() < 1e-9);
        assert_eq!(player.position_samples(), 882);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drains_to_end_of_stream_and_auto_stops() {
        let (player, mut sink) = Player::new(small_config()).unwrap();
        let one_second = SineTone::test_tone(STEREO).with_duration(1.0);
        assert!(player.init(Box::new(one_second)));
        assert!(player.play().await);

        let mut out = vec![0.0f32; 1024];
        let mut drained = false;
        for _ in 0..5_000 {
            sink.on_tick(&mut out);
            let stats = player.stats();
            if stats.end_of_stream && stats.available == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(drained, "never reached end of stream: {:?}", player.stats());

        let signals = player.stats().signals_sent;
        for _ in 0..10 {
            sink.on_tick(&mut out);
        }
        let stats = player.stats();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.signals_sent, signals);
        assert_eq!(stats.state, PlaybackState::Playing);

        assert!(player.position_ms() > 0.0);
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert_eq!(player.stats().position_samples, 0);
        assert_eq!(player.position_ms(), 0.0);
    }
}
