//! IPC protocol types for the playout binary.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (stdout).
//! Commands use `{"command": "<name>", ...}` format (stdin).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::audio::output::AudioDeviceInfo;
use crate::audio::source::{SampleSource, SineTone, SourceFormat};
use crate::audio::state::PlaybackState;
use crate::diagnostics::PlaybackStats;

// ---------------------------------------------------------------------------
// Events: playout -> client (stdout)
// ---------------------------------------------------------------------------

/// All events emitted via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum PlayoutEvent {
    Starting {},
    Ready {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        channels: u16,
        capacity: usize,
    },
    StateChange { state: PlaybackState },
    Position {
        ms: f64,
        samples: u64,
    },
    Stats(PlaybackStats),
    AudioDevices { output: Vec<AudioDeviceInfo> },
    EndOfStream {
        #[serde(rename = "positionMs")]
        position_ms: f64,
    },
    Error { message: String },
    Pong {},
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: client -> playout (stdin)
// ---------------------------------------------------------------------------

/// All commands received via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum PlayoutCommand {
    Init {
        #[serde(default)]
        source: SourceSpec,
    },
    Play {},
    Pause {},
    Resume {},
    Stop {},
    GetPosition {},
    GetStats {},
    ListAudioDevices {},
    Ping {},
    Shutdown {},
}

/// Source to attach on `init`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Sine test tone, stereo at 44.1 kHz. Endless unless `seconds` is set.
    Tone {
        #[serde(default)]
        frequency: Option<f64>,
        #[serde(default)]
        amplitude: Option<f32>,
        #[serde(default)]
        seconds: Option<f64>,
    },
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self::Tone {
            frequency: None,
            amplitude: None,
            seconds: None,
        }
    }
}

impl SourceSpec {
    pub fn build(&self) -> Box<dyn SampleSource> {
        match *self {
            Self::Tone {
                frequency,
                amplitude,
                seconds,
            } => {
                let tone = SineTone::new(
                    frequency.unwrap_or(SineTone::DEFAULT_FREQUENCY),
                    amplitude.unwrap_or(SineTone::DEFAULT_AMPLITUDE),
                    SourceFormat::new(44_100, 2),
                );
                match seconds {
                    Some(s) => Box::new(tone.with_duration(s)),
                    None => Box::new(tone),
                }
            }
        }
    }
}
