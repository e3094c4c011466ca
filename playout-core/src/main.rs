//! Playout core: real-time audio playout driven over JSON-line IPC.
//!
//! Commands arrive on stdin, events go to stdout, logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use playout_core::audio::list_output_devices;
use playout_core::ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use playout_core::ipc::{PlayoutCommand, PlayoutEvent};
use playout_core::player::Position;
use playout_core::{PlaybackState, Player, PlayoutConfig};

/// How often the main loop checks for end-of-stream while playing.
const POSITION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Set up stderr logging. Keep the guard alive until exit so buffered
/// lines get flushed.
fn init_logging() -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .compact(),
        )
        .init();

    guard
}

#[tokio::main]
async fn main() {
    let _log_guard = init_logging();

    // Emit starting event immediately so the client knows we're alive.
    emit_event(&PlayoutEvent::Starting {});

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match PlayoutConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            emit_error(&format!("Invalid configuration: {:#}", e));
            return;
        }
    };
    info!(?config, "Configuration loaded");

    // A missing device is not fatal; init retries opening it.
    let mut player = open_player(&config);
    if let Some(p) = &player {
        emit_ready(p);
    }

    let mut cmd_rx = spawn_stdin_reader();
    let mut poll = tokio::time::interval(POSITION_POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(command, &config, &mut player) {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            _ = poll.tick() => {
                if let Some(p) = &player {
                    if p.state() == PlaybackState::Playing {
                        query_position(p);
                    }
                }
            }
        }
    }

    if let Some(p) = &player {
        p.stop();
    }
    info!("Playout core shutting down");
}

fn open_player(config: &PlayoutConfig) -> Option<Arc<Player>> {
    match Player::open_output(config.clone()) {
        Ok(player) => Some(Arc::new(player)),
        Err(e) => {
            error!("Failed to open audio output: {:#}", e);
            emit_error(&format!("Failed to open audio output: {:#}", e));
            None
        }
    }
}

fn emit_ready(player: &Player) {
    let stats = player.stats();
    emit_event(&PlayoutEvent::Ready {
        sample_rate: player.config().sample_rate,
        channels: player.config().channels,
        capacity: stats.capacity,
    });
    info!("Playout core ready");
}

/// Read the position, emitting the end-of-stream events if the read
/// stopped playback.
fn query_position(player: &Player) -> Position {
    let before = player.state();
    let position = player.position();
    if before == PlaybackState::Playing && player.state() == PlaybackState::Stopped {
        emit_event(&PlayoutEvent::EndOfStream {
            position_ms: position.ms,
        });
        emit_state(player);
    }
    position
}

fn emit_state(player: &Player) {
    emit_event(&PlayoutEvent::StateChange {
        state: player.state(),
    });
}

/// Report the outcome of a state-changing control call.
fn emit_transition(player: &Player, accepted: bool, what: &str) {
    if accepted {
        emit_state(player);
    } else {
        emit_error(&format!("{} rejected in state {}", what, player.state()));
    }
}

/// Handle a single command. Returns `false` if the main loop should exit.
fn handle_command(
    cmd: PlayoutCommand,
    config: &PlayoutConfig,
    player: &mut Option<Arc<Player>>,
) -> bool {
    match cmd {
        PlayoutCommand::Ping {} => {
            emit_event(&PlayoutEvent::Pong {});
            return true;
        }
        PlayoutCommand::Shutdown {} => {
            emit_event(&PlayoutEvent::Stopping {});
            return false;
        }
        PlayoutCommand::ListAudioDevices {} => {
            emit_event(&PlayoutEvent::AudioDevices {
                output: list_output_devices(),
            });
            return true;
        }
        _ => {}
    }

    // Everything else needs a device; a previous failure gets retried on init.
    if player.is_none() && matches!(cmd, PlayoutCommand::Init { .. }) {
        *player = open_player(config);
        if let Some(p) = player.as_ref() {
            emit_ready(p);
        }
    }
    let Some(p) = player.as_ref() else {
        warn!(?cmd, "No audio output, command ignored");
        emit_error("No audio output available");
        return true;
    };

    match cmd {
        PlayoutCommand::Init { source } => {
            if !p.init(source.build()) {
                emit_error(&format!("Init rejected in state {}", p.state()));
            }
        }
        PlayoutCommand::Play {} => {
            // Priming can take a while; keep reading commands meanwhile.
            let p = Arc::clone(p);
            tokio::spawn(async move {
                let accepted = p.play().await;
                emit_transition(&p, accepted, "Play");
            });
        }
        PlayoutCommand::Pause {} => emit_transition(p, p.pause(), "Pause"),
        PlayoutCommand::Resume {} => emit_transition(p, p.resume(), "Resume"),
        PlayoutCommand::Stop {} => {
            p.stop();
            emit_state(p);
        }
        PlayoutCommand::GetPosition {} => {
            let position = query_position(p);
            emit_event(&PlayoutEvent::Position {
                ms: position.ms,
                samples: position.samples,
            });
        }
        PlayoutCommand::GetStats {} => emit_event(&PlayoutEvent::Stats(p.stats())),
        PlayoutCommand::Ping {} | PlayoutCommand::Shutdown {} | PlayoutCommand::ListAudioDevices {} => {}
    }

    true
}
