//! Audio path: source adaptation, transfer ring, sink and device output.

pub mod adapter;
pub mod convert;
pub mod output;
pub mod ring_buffer;
pub mod sink;
pub mod source;
pub mod state;

pub use adapter::{Pulled, SourceAdapter};
pub use output::{list_output_devices, start_output, AudioDeviceInfo, SendStream};
pub use ring_buffer::TransferRing;
pub use sink::RealtimeSink;
pub use source::{ClipSource, SampleSource, SineTone, SourceFormat};
pub use state::{PlaybackState, PlaybackStateMachine};
