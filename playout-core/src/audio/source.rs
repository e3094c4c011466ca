//! Upstream sample sources.
//!
//! A `SampleSource` is whatever synthesizes or decodes audio: it is pulled
//! from the feed path (never from the audio callback) and may be slow.

use std::f64::consts::TAU;

/// Sample rate and channel count of interleaved f32 audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SourceFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz / {} ch", self.sample_rate, self.channels)
    }
}

/// Common trait for upstream audio producers.
pub trait SampleSource: Send {
    /// Native format of the samples returned by [`read`](Self::read).
    fn format(&self) -> SourceFormat;

    /// Fill `buf` with interleaved samples, returning how many were written.
    /// `Ok(0)` means the source is exhausted.
    fn read(&mut self, buf: &mut [f32]) -> anyhow::Result<usize>;

    /// Display name (e.g. "Sine 440 Hz").
    fn name(&self) -> String;
}

/// Sine tone generator, endless unless given a duration.
pub struct SineTone {
    format: SourceFormat,
    frequency: f64,
    amplitude: f32,
    phase: f64,
    /// Frames left to produce; `None` for an endless tone.
    remaining_frames: Option<u64>,
}

impl SineTone {
    pub const DEFAULT_FREQUENCY: f64 = 440.0;
    pub const DEFAULT_AMPLITUDE: f32 = 0.3;

    pub fn new(frequency: f64, amplitude: f32, format: SourceFormat) -> Self {
        Self {
            format,
            frequency,
            amplitude,
            phase: 0.0,
            remaining_frames: None,
        }
    }

    /// The 440 Hz, 30% amplitude test tone.
    pub fn test_tone(format: SourceFormat) -> Self {
        Self::new(Self::DEFAULT_FREQUENCY, Self::DEFAULT_AMPLITUDE, format)
    }

    /// Stop after `seconds` of audio.
    pub fn with_duration(mut self, seconds: f64) -> Self {
        let frames = (seconds.max(0.0) * self.format.sample_rate as f64).round() as u64;
        self.remaining_frames = Some(frames);
        self
    }
}

impl SampleSource for SineTone {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> anyhow::Result<usize> {
        let ch = self.format.channels.max(1) as usize;
        let mut frames = buf.len() / ch;
        if let Some(remaining) = self.remaining_frames {
            frames = frames.min(remaining as usize);
            self.remaining_frames = Some(remaining - frames as u64);
        }

        let increment = TAU * self.frequency / self.format.sample_rate.max(1) as f64;
        for frame in buf[..frames * ch].chunks_exact_mut(ch) {
            let sample = (self.phase.sin() as f32) * self.amplitude;
            frame.fill(sample);
            self.phase += increment;
            if self.phase > TAU {
                self.phase -= TAU;
            }
        }

        Ok(frames * ch)
    }

    fn name(&self) -> String {
        format!("Sine {} Hz", self.frequency)
    }
}

/// Pre-rendered clip held in memory.
pub struct ClipSource {
    format: SourceFormat,
    samples: Vec<f32>,
    cursor: usize,
}

impl ClipSource {
    pub fn new(samples: Vec<f32>, format: SourceFormat) -> Self {
        Self {
            format,
            samples,
            cursor: 0,
        }
    }

    /// Samples not yet read.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.cursor
    }
}

impl SampleSource for ClipSource {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> anyhow::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.samples[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }

    fn name(&self) -> String {
        format!("Clip ({} samples, {})", self.samples.len(), self.format)
    }
}
