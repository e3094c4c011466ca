//! Source adapter: uniform pull interface over a `SampleSource`.
//!
//! Converts upstream audio to the output device's native rate and channel
//! count before it enters the transfer ring, so everything downstream runs
//! in a single format.

use tracing::{debug, info};

use super::convert::{remix, LinearResampler};
use super::source::{SampleSource, SourceFormat};

/// Result of one [`SourceAdapter::pull`].
#[derive(Debug)]
pub struct Pulled<'a> {
    /// Interleaved samples in the target format.
    pub samples: &'a [f32],
    pub count: usize,
    /// Set only together with `count == 0`, once upstream is exhausted.
    pub end_of_stream: bool,
}

pub struct SourceAdapter {
    source: Box<dyn SampleSource>,
    source_format: SourceFormat,
    target: SourceFormat,
    resampler: LinearResampler,
    /// Raw upstream samples.
    scratch: Vec<f32>,
    /// Upstream samples remixed to the target channel count.
    remixed: Vec<f32>,
    /// Output of the last pull.
    out: Vec<f32>,
    upstream_done: bool,
}

impl SourceAdapter {
    /// Wrap `source`. Output is passed through unchanged until
    /// [`init`](Self::init) sets the target format.
    pub fn new(source: Box<dyn SampleSource>) -> Self {
        let source_format = source.format();
        let channels = source_format.channels.max(1) as usize;
        Self {
            source,
            source_format,
            target: source_format,
            resampler: LinearResampler::new(
                source_format.sample_rate,
                source_format.sample_rate,
                channels,
            ),
            scratch: Vec::new(),
            remixed: Vec::new(),
            out: Vec::new(),
            upstream_done: false,
        }
    }

    /// Fix the output format for this session to the sink's native format.
    pub fn init(&mut self, native_sample_rate: u32, native_channels: u16) -> anyhow::Result<()> {
        if native_sample_rate == 0 || native_channels == 0 {
            anyhow::bail!(
                "Invalid output format: {} Hz / {} ch",
                native_sample_rate,
                native_channels
            );
        }
        if self.source_format.sample_rate == 0 || self.source_format.channels == 0 {
            anyhow::bail!("Source '{}' reports an invalid format", self.source.name());
        }

        self.target = SourceFormat::new(native_sample_rate, native_channels);
        self.resampler = LinearResampler::new(
            self.source_format.sample_rate,
            native_sample_rate,
            native_channels as usize,
        );
        self.out.clear();
        self.upstream_done = false;

        info!(
            source = %self.source.name(),
            from = %self.source_format,
            to = %self.target,
            resampling = !self.resampler.is_passthrough(),
            "Source adapter initialized"
        );
        Ok(())
    }

    /// Output format of [`pull`](Self::pull).
    pub fn format(&self) -> SourceFormat {
        self.target
    }

    pub fn source_name(&self) -> String {
        self.source.name()
    }

    /// Pull at most `max_samples` interleaved samples in the target format.
    ///
    /// Only whole frames are returned. Upstream errors are propagated; the
    /// adapter does not retry.
    pub fn pull(&mut self, max_samples: usize) -> anyhow::Result<Pulled<'_>> {
        let out_ch = self.target.channels as usize;
        let in_ch = self.source_format.channels as usize;
        let wanted = max_samples / out_ch;

        self.out.clear();
        let mut produced = 0;

        while wanted > 0 {
            produced += self
                .resampler
                .process(&mut self.out, wanted - produced, self.upstream_done);
            if produced >= wanted || self.upstream_done {
                break;
            }

            let missing = wanted - produced;
            let in_frames = (missing as f64 * self.resampler.step()).ceil() as usize + 1;
            self.scratch.resize(in_frames * in_ch, 0.0);

            let n = self.source.read(&mut self.scratch)?;
            let whole = n.min(self.scratch.len()) / in_ch * in_ch;
            if whole == 0 {
                debug!(source = %self.source.name(), "Upstream source exhausted");
                self.upstream_done = true;
                continue;
            }

            remix(&self.scratch[..whole], in_ch, out_ch, &mut self.remixed);
            self.resampler.push(&self.remixed);
        }

        Ok(Pulled {
            samples: &self.out,
            count: self.out.len(),
            end_of_stream: produced == 0 && self.upstream_done,
        })
    }
}
