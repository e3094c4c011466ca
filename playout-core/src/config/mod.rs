//! Playout tuning parameters and where they are read from.

pub mod paths;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use paths::get_data_dir;

/// playout_config.json shape. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayoutConfig {
    /// Output rate the sink runs at.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Requested ring size in samples. Rounded up to a power-of-two frame
    /// count.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Fill fraction below which the sink asks for a refill.
    #[serde(default = "default_low_watermark")]
    pub low_watermark: f32,
    /// Fill fraction a refill burst aims for.
    #[serde(default = "default_high_watermark")]
    pub high_watermark: f32,
    /// Samples pulled from the source per refill cycle.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_cycles_per_signal")]
    pub max_cycles_per_signal: usize,
    #[serde(default = "default_priming_cycles")]
    pub priming_cycles: usize,
    /// Frames per device callback, if the device honors a fixed size.
    #[serde(default = "default_tick_frames")]
    pub tick_frames: u32,
    /// Sink ticks between diagnostics reports.
    #[serde(default = "default_stats_stride")]
    pub stats_stride: u32,
    /// Output device name; the system default when unset or not found.
    #[serde(default)]
    pub output_device: Option<String>,
}

fn default_sample_rate() -> u32 {
    44_100
}
fn default_channels() -> u16 {
    2
}
fn default_ring_capacity() -> usize {
    16_384
}
fn default_low_watermark() -> f32 {
    0.55
}
fn default_high_watermark() -> f32 {
    0.85
}
fn default_chunk_size() -> usize {
    1024
}
fn default_max_cycles_per_signal() -> usize {
    8
}
fn default_priming_cycles() -> usize {
    10
}
fn default_tick_frames() -> u32 {
    512
}
fn default_stats_stride() -> u32 {
    4
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            ring_capacity: default_ring_capacity(),
            low_watermark: default_low_watermark(),
            high_watermark: default_high_watermark(),
            chunk_size: default_chunk_size(),
            max_cycles_per_signal: default_max_cycles_per_signal(),
            priming_cycles: default_priming_cycles(),
            tick_frames: default_tick_frames(),
            stats_stride: default_stats_stride(),
            output_device: None,
        }
    }
}

impl PlayoutConfig {
    /// Check the parameters for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_rate == 0 {
            anyhow::bail!("sampleRate must be greater than 0");
        }
        if self.channels == 0 {
            anyhow::bail!("channels must be greater than 0");
        }
        if self.ring_capacity == 0 {
            anyhow::bail!("ringCapacity must be greater than 0");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunkSize must be greater than 0");
        }
        if self.chunk_size % self.channels as usize != 0 {
            anyhow::bail!(
                "chunkSize {} is not a whole number of {}-channel frames",
                self.chunk_size,
                self.channels
            );
        }
        for (name, value) in [
            ("lowWatermark", self.low_watermark),
            ("highWatermark", self.high_watermark),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                anyhow::bail!("{} must be in (0, 1], got {}", name, value);
            }
        }
        if self.low_watermark >= self.high_watermark {
            anyhow::bail!(
                "lowWatermark ({}) must be below highWatermark ({})",
                self.low_watermark,
                self.high_watermark
            );
        }
        if self.max_cycles_per_signal == 0 {
            anyhow::bail!("maxCyclesPerSignal must be greater than 0");
        }
        if self.stats_stride == 0 {
            anyhow::bail!("statsStride must be greater than 0");
        }
        if self.priming_overflows() {
            warn!(
                priming = self.priming_cycles * self.chunk_size,
                capacity = self.effective_ring_capacity(),
                "Priming burst exceeds the ring; the start of the stream will be evicted"
            );
        }
        Ok(())
    }

    /// Ring size in samples after rounding up to a power-of-two frame count.
    pub fn effective_ring_capacity(&self) -> usize {
        let channels = (self.channels as usize).max(1);
        self.ring_capacity.div_ceil(channels).next_power_of_two() * channels
    }

    /// Whether the priming burst pushes more than the ring holds.
    pub fn priming_overflows(&self) -> bool {
        self.priming_cycles.saturating_mul(self.chunk_size) > self.effective_ring_capacity()
    }

    /// Load from `path`, or from playout_config.json in the data directory.
    ///
    /// A missing file gives the defaults, an unparsable one logs a warning
    /// and gives the defaults. Invalid values are an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);
        let config = match read_json_file::<PlayoutConfig>(&path) {
            Some(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Path to playout_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("playout_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlayoutConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_capacity, 16_384);
        assert!(!config.priming_overflows());
        assert_eq!(config.low_watermark, 0.55);
        assert_eq!(config.high_watermark, 0.85);
        assert_eq!(config.output_device, None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ringCapacity": 4096, "outputDevice": "USB DAC"}}"#).unwrap();

        let config = PlayoutConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ring_capacity, 4096);
        assert_eq!(config.output_device.as_deref(), Some("USB DAC"));
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.priming_cycles, 10);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlayoutConfig::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config, PlayoutConfig::default());
    }

    #[test]
    fn test_garbage_file_gives_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json at all").unwrap();
        let config = PlayoutConfig::load(Some(file.path())).unwrap();
        assert_eq!(config, PlayoutConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"lowWatermark": 0.9, "highWatermark": 0.8}}"#).unwrap();
        assert!(PlayoutConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_validate_rules() {
        let ok = PlayoutConfig::default();
        let cases = [
            PlayoutConfig { channels: 0, ..ok.clone() },
            PlayoutConfig { sample_rate: 0, ..ok.clone() },
            PlayoutConfig { ring_capacity: 0, ..ok.clone() },
            PlayoutConfig { chunk_size: 1023, ..ok.clone() },
            PlayoutConfig { low_watermark: 0.0, ..ok.clone() },
            PlayoutConfig { high_watermark: 1.5, ..ok.clone() },
            PlayoutConfig { max_cycles_per_signal: 0, ..ok.clone() },
            PlayoutConfig { stats_stride: 0, ..ok.clone() },
        ];
        for case in cases {
            assert!(case.validate().is_err(), "{:?}", case);
        }
        let full = PlayoutConfig {
            high_watermark: 1.0,
            ..ok
        };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_priming_larger_than_ring_still_valid() {
        // 10 x 1024 samples into a 4096-sample ring evicts the oldest data
        // but playback still works, so only a warning.
        let small = PlayoutConfig {
            ring_capacity: 4096,
            ..PlayoutConfig::default()
        };
        assert!(small.priming_overflows());
        assert!(small.validate().is_ok());

        // 10000 rounds up to 8192 frames.
        let rounded = PlayoutConfig {
            ring_capacity: 10_000,
            ..PlayoutConfig::default()
        };
        assert_eq!(rounded.effective_ring_capacity(), 16_384);
        assert!(!rounded.priming_overflows());
    }

    #[test]
    fn test_config_path_file_name() {
        assert!(get_config_path().ends_with("playout_config.json"));
    }
}
