//! Atomic playback state machine.
//!
//! Lock-free state tracking using `AtomicU8`, shared between the control
//! surface, the feed controller and the real-time sink callback.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Playback states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PlaybackState {
    /// Initial state. The sink outputs silence, nothing is buffered.
    Stopped = 0,
    /// The sink drains the ring and the feed controller refills it.
    Playing = 1,
    /// Buffered audio is kept, but nothing moves.
    Paused = 2,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Playing,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Thread-safe playback state.
#[derive(Debug)]
pub struct PlaybackStateMachine {
    state: AtomicU8,
}

impl PlaybackStateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped as u8),
        }
    }

    /// Current state.
    pub fn current_state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.current_state() == PlaybackState::Playing
    }

    /// Transition Stopped -> Playing.
    pub fn start(&self) -> bool {
        self.transition(PlaybackState::Stopped, PlaybackState::Playing)
    }

    /// Transition Playing -> Paused.
    pub fn pause(&self) -> bool {
        self.transition(PlaybackState::Playing, PlaybackState::Paused)
    }

    /// Transition Paused -> Playing.
    pub fn resume(&self) -> bool {
        self.transition(PlaybackState::Paused, PlaybackState::Playing)
    }

    /// Force back to Stopped from any state. Returns the previous state.
    pub fn stop(&self) -> PlaybackState {
        PlaybackState::from_u8(
            self.state
                .swap(PlaybackState::Stopped as u8, Ordering::AcqRel),
        )
    }

    fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for PlaybackStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
