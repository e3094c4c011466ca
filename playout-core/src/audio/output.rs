//! Audio output via cpal.
//!
//! Opens the configured (or default) output device at the session format
//! and drives the [`RealtimeSink`] from the device callback.

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, StreamConfig, SupportedBufferSize};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::sink::RealtimeSink;
use crate::config::PlayoutConfig;

/// One entry of the device list reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: i32,
    pub name: String,
    /// Audio API (cpal host) the device belongs to, e.g. "ALSA".
    pub api: String,
}

/// List output devices across every available audio host.
pub fn list_output_devices() -> Vec<AudioDeviceInfo> {
    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        if let Ok(outputs) = host.output_devices() {
            for dev in outputs {
                if let Ok(name) = dev.name() {
                    devices.push(AudioDeviceInfo {
                        id: devices.len() as i32,
                        name,
                        api: host_id.name().to_string(),
                    });
                }
            }
        }
    }
    devices
}

/// Wrapper to make `cpal::Stream` Send.
///
/// `cpal::Stream` is `!Send` on some platforms due to internal raw pointers,
/// but we only hold it alive. The callback runs on cpal's own thread.
pub struct SendStream(#[allow(dead_code)] cpal::Stream);

// SAFETY: the stream is only kept alive and dropped, never used from
// another thread. No method reaches it through a shared reference.
unsafe impl Send for SendStream {}
unsafe impl Sync for SendStream {}

/// Find the named output device, falling back to the default one.
fn resolve_device(device_name: Option<&str>) -> anyhow::Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let device = host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        match device {
            Some(dev) => {
                info!(device = %name, "Using configured output device");
                return Ok(dev);
            }
            None => warn!(
                device = %name,
                "Configured output device not found, falling back to default"
            ),
        }
    }

    host.default_output_device()
        .context("No audio output device available")
}

/// Open the output stream and start the sink ticking.
///
/// The stream must be kept alive for playback to continue.
pub fn start_output(sink: RealtimeSink, config: &PlayoutConfig) -> anyhow::Result<SendStream> {
    let device = resolve_device(config.output_device.as_deref())?;
    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());

    // Ask for fixed-size ticks only if the device says it can do them.
    let buffer_size = match device.default_output_config().map(|c| *c.buffer_size()) {
        Ok(SupportedBufferSize::Range { min, max })
            if (min..=max).contains(&config.tick_frames) =>
        {
            BufferSize::Fixed(config.tick_frames)
        }
        _ => BufferSize::Default,
    };

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size,
    };

    info!(
        device = %dev_name,
        sample_rate = config.sample_rate,
        channels = config.channels,
        buffer = ?buffer_size,
        "Opening output stream"
    );

    let mut sink = sink;
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                sink.on_tick(data);
            },
            move |err| {
                error!("Audio output stream error: {}", err);
            },
            None,
        )
        .with_context(|| format!("Failed to build output stream on '{}'", dev_name))?;

    stream.play().context("Failed to start output stream")?;
    info!("Audio output started");

    Ok(SendStream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_output_devices() {
        // Should not panic, even on a machine without audio hardware.
        let devices = list_output_devices();
        for (i, dev) in devices.iter().enumerate() {
            assert_eq!(dev.id, i as i32);
            assert!(!dev.api.is_empty());
        }
    }

    #[test]
    fn test_device_info_json() {
        let info = AudioDeviceInfo {
            id: 0,
            name: "Speakers".into(),
            api: "ALSA".into(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"id":0,"name":"Speakers","api":"ALSA"}"#);
    }
}
