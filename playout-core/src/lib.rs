//! Real-time audio playout with a backpressure-driven feed loop.
//!
//! An upstream [`SampleSource`] is adapted to the output format and pushed
//! into a fixed-size [`TransferRing`]. The device callback drains the ring
//! through a [`RealtimeSink`] and asks the feed controller for more audio
//! whenever the fill level drops below the low watermark.

pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod feed;
pub mod ipc;
pub mod player;
pub mod session;

pub use audio::{
    PlaybackState, RealtimeSink, SampleSource, SineTone, SourceAdapter, SourceFormat,
    TransferRing,
};
pub use config::PlayoutConfig;
pub use diagnostics::PlaybackStats;
pub use feed::{FeedConfig, FeedController, RefillOutcome, RefillTrigger};
pub use player::Player;
