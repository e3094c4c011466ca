//! Channel remixing and streaming sample-rate conversion.
//!
//! Everything downstream of the source adapter runs at the output device's
//! native format; these helpers get upstream audio there.

/// Remix interleaved `input` from `from` channels to `to` channels into `out`.
///
/// Mono is duplicated to every output channel, anything down to mono is
/// averaged, and other layouts map channel `i` to input channel `i % from`.
/// `out` is cleared first. A trailing partial frame is ignored.
pub fn remix(input: &[f32], from: usize, to: usize, out: &mut Vec<f32>) {
    out.clear();
    if from == 0 || to == 0 {
        return;
    }
    if from == to {
        out.extend_from_slice(&input[..input.len() - input.len() % from]);
        return;
    }

    let frames = input.chunks_exact(from);
    out.reserve(frames.len() * to);
    if to == 1 {
        out.extend(frames.map(|frame| frame.iter().sum::<f32>() / from as f32));
    } else {
        for frame in frames {
            out.extend((0..to).map(|c| frame[c % from]));
        }
    }
}

/// Linear-interpolating resampler that keeps state across calls, so audio
/// can be converted in arbitrary chunk sizes without seams.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    channels: usize,
    /// Input frames advanced per output frame (`from_rate / to_rate`).
    step: f64,
    /// Fractional read position into `pending`, in frames.
    pos: f64,
    /// Interleaved input frames not yet consumed.
    pending: Vec<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            step: from_rate as f64 / to_rate.max(1) as f64,
            pos: 0.0,
            pending: Vec::new(),
        }
    }

    /// Input frames consumed per output frame.
    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    /// Input frames queued and not yet consumed.
    pub fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    /// Queue interleaved input frames.
    pub fn push(&mut self, input: &[f32]) {
        self.pending
            .extend_from_slice(&input[..input.len() - input.len() % self.channels]);
    }

    /// Produce up to `max_frames` output frames, appending them to `out`.
    ///
    /// Interpolation needs the frame after the read position; with `flush`
    /// set (upstream exhausted) the last frame is held instead, so the tail
    /// is drained. Returns the number of frames produced.
    pub fn process(&mut self, out: &mut Vec<f32>, max_frames: usize, flush: bool) -> usize {
        let ch = self.channels;
        let frames = self.pending_frames();
        let mut produced = 0;

        while produced < max_frames {
            let idx = self.pos.floor() as usize;
            if idx >= frames {
                break;
            }
            let frac = (self.pos - idx as f64) as f32;
            let next = if idx + 1 < frames {
                idx + 1
            } else if frac == 0.0 || flush {
                idx
            } else {
                break;
            };

            for c in 0..ch {
                let s0 = self.pending[idx * ch + c];
                let s1 = self.pending[next * ch + c];
                out.push(s0 + frac * (s1 - s0));
            }
            self.pos += self.step;
            produced += 1;
        }

        let consumed = (self.pos.floor() as usize).min(frames);
        self.pending.drain(..consumed * ch);
        self.pos -= consumed as f64;

        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_remix_mono_to_stereo_duplicates() {
        let mut out = Vec::new();
        remix(&[0.1, 0.2], 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_remix_stereo_to_mono_averages() {
        let mut out = Vec::new();
        remix(&[1.0, 0.0, 0.5, -0.5, 0.3], 2, 1, &mut out);
        assert_eq!(out, vec![0.5, 0.0]);
    }

    #[test]
    fn test_remix_same_layout_is_copy() {
        let mut out = vec![9.0];
        remix(&[1.0, 2.0, 3.0, 4.0], 2, 2, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_resample_same_rate_is_passthrough() {
        let mut rs = LinearResampler::new(44_100, 44_100, 2);
        assert!(rs.is_passthrough());
        rs.push(&[1.0, 2.0, 3.0, 4.0]);

        let mut out = Vec::new();
        assert_eq!(rs.process(&mut out, 16, false), 2);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rs.pending_frames(), 0);
    }

    #[test]
    fn test_resample_downsample() {
        // 48kHz -> 16kHz = 3:1 ratio
        let mut rs = LinearResampler::new(48_000, 16_000, 1);
        let input: Vec<f32> = (0..48).map(|i| i as f32).collect();
        rs.push(&input);

        let mut out = Vec::new();
        let produced = rs.process(&mut out, 100, true);
        assert_eq!(produced, 16);
        assert_abs_diff_eq!(out[1], 3.0);
        assert_abs_diff_eq!(out[15], 45.0);
    }

    #[test]
    fn test_resample_upsample_interpolates() {
        let mut rs = LinearResampler::new(22_050, 44_100, 1);
        rs.push(&[0.0, 1.0, 0.0]);

        let mut out = Vec::new();
        rs.process(&mut out, 100, false);
        assert_eq!(out.len(), 5);
        assert_abs_diff_eq!(out[0], 0.0);
        assert_abs_diff_eq!(out[1], 0.5);
        assert_abs_diff_eq!(out[2], 1.0);
        assert_abs_diff_eq!(out[3], 0.5);
        assert_abs_diff_eq!(out[4], 0.0);

        // Flushing drains the held tail.
        rs.process(&mut out, 100, true);
        assert_eq!(out.len(), 6);
        assert_abs_diff_eq!(out[5], 0.0);
        assert_eq!(rs.pending_frames(), 0);
    }

    #[test]
    fn test_resample_across_chunks_is_seamless() {
        let input: Vec<f32> = (0..64).map(|i| i as f32).collect();

        let mut whole = LinearResampler::new(24_000, 48_000, 1);
        whole.push(&input);
        let mut expected = Vec::new();
        whole.process(&mut expected, usize::MAX, true);

        let mut chunked = LinearResampler::new(24_000, 48_000, 1);
        let mut out = Vec::new();
        for chunk in input.chunks(7) {
            chunked.push(chunk);
            chunked.process(&mut out, usize::MAX, false);
        }
        chunked.process(&mut out, usize::MAX, true);

        assert_eq!(out.len(), expected.len());
        for (a, b) in out.iter().zip(&expected) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_resample_respects_max_frames() {
        let mut rs = LinearResampler::new(44_100, 48_000, 2);
        rs.push(&vec![0.5; 2_000]);
        let mut out = Vec::new();
        assert_eq!(rs.process(&mut out, 10, false), 10);
        assert_eq!(out.len(), 20);
    }
}
