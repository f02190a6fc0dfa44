//! Audio device output using cpal
//!
//! Opens the output device and runs the realtime stream. The stream callback
//! pulls frames from a closure (in practice the ring-buffer consumer) and
//! writes them to the device; gain staging already happened in the mixer.

use crate::audio::types::{AudioFrame, STANDARD_SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::{Arc, Mutex};
use stillpoint_common::{EngineError, Result};
use tracing::{debug, info, warn};

/// Audio output manager
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// List available output device names
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| EngineError::EngineStart {
                reason: format!("failed to enumerate devices: {e}"),
            })?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device (`None` = system default)
    pub fn new(device_name: Option<String>) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name.as_ref() {
            let mut devices = host.output_devices().map_err(|e| EngineError::EngineStart {
                reason: format!("failed to enumerate devices: {e}"),
            })?;
            devices
                .find(|d| d.name().ok().as_ref() == Some(name))
                .ok_or_else(|| EngineError::EngineStart {
                    reason: format!("device '{name}' not found"),
                })?
        } else {
            host.default_output_device()
                .ok_or_else(|| EngineError::EngineStart {
                    reason: "no default output device".into(),
                })?
        };

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let (config, sample_format) = Self::best_config(&device)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
        })
    }

    /// Pick the device config closest to the standard format
    ///
    /// Prefers 44.1 kHz stereo f32; falls back to the device default. A
    /// non-standard device rate is tolerated (the session bus handles it)
    /// rather than re-resampling at play time.
    fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| EngineError::EngineStart {
                reason: format!("failed to get device configs: {e}"),
            })?;

        let preferred = supported.find(|config| {
            config.channels() == 2
                && config.min_sample_rate().0 <= STANDARD_SAMPLE_RATE
                && config.max_sample_rate().0 >= STANDARD_SAMPLE_RATE
                && config.sample_format() == SampleFormat::F32
        });

        if let Some(supported_config) = preferred {
            let sample_format = supported_config.sample_format();
            let config = supported_config
                .with_sample_rate(cpal::SampleRate(STANDARD_SAMPLE_RATE))
                .config();
            return Ok((config, sample_format));
        }

        let supported_config = device
            .default_output_config()
            .map_err(|e| EngineError::EngineStart {
                reason: format!("failed to get default config: {e}"),
            })?;
        warn!(
            "standard 44.1kHz stereo f32 config unavailable; using device default ({}Hz)",
            supported_config.sample_rate().0
        );
        Ok((supported_config.config(), supported_config.sample_format()))
    }

    /// Start the realtime stream
    ///
    /// `next_frame` is invoked on the audio thread once per output frame and
    /// must not block; it should return silence when nothing is available.
    /// The device's sample format only changes how each clamped f32 sample
    /// is written out; the per-format conversions live here.
    pub fn start<F>(&mut self, next_frame: F) -> Result<()>
    where
        F: FnMut() -> AudioFrame + Send + 'static,
    {
        info!("Starting audio stream");

        let next_frame: Arc<Mutex<dyn FnMut() -> AudioFrame + Send>> =
            Arc::new(Mutex::new(next_frame));

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream(next_frame, |sample| sample)?,
            SampleFormat::I16 => self.build_stream(next_frame, |sample| {
                (sample * f32::from(i16::MAX)) as i16
            })?,
            SampleFormat::U16 => self.build_stream(next_frame, |sample| {
                // [-1.0, 1.0] to [0, 65535]
                ((sample + 1.0) * 32767.5) as u16
            })?,
            other => {
                return Err(EngineError::EngineStart {
                    reason: format!("unsupported sample format: {other:?}"),
                });
            }
        };

        stream.play().map_err(|e| EngineError::EngineStart {
            reason: format!("failed to start stream: {e}"),
        })?;
        self.stream = Some(stream);

        info!("Audio stream started");
        Ok(())
    }

    /// Build the device stream, writing each frame through `convert`
    ///
    /// One writer covers every device sample format; `convert` maps a
    /// clamped f32 sample into the device's type.
    fn build_stream<T>(
        &self,
        next_frame: Arc<Mutex<dyn FnMut() -> AudioFrame + Send>>,
        convert: impl Fn(f32) -> T + Send + 'static,
    ) -> Result<Stream>
    where
        T: SizedSample,
    {
        let channels = self.config.channels as usize;

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut next_frame = next_frame.lock().unwrap();
                    for frame in data.chunks_mut(channels) {
                        let audio = (*next_frame)();
                        frame[0] = convert(audio.left.clamp(-1.0, 1.0));
                        if channels > 1 {
                            frame[1] = convert(audio.right.clamp(-1.0, 1.0));
                        }
                    }
                },
                move |err| warn!("audio stream error: {}", err),
                None,
            )
            .map_err(|e| EngineError::EngineStart {
                reason: format!("failed to build stream: {e}"),
            })
    }

    /// Stop and drop the stream
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio stream");
            stream.pause().map_err(|e| EngineError::EngineStart {
                reason: format!("failed to pause stream: {e}"),
            })?;
        }
        Ok(())
    }

    /// Device sample rate for the open config
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Channel count for the open config
    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        // Hardware-dependent; either outcome is acceptable in CI
        let result = AudioOutput::list_devices();
        assert!(result.is_ok() || result.is_err());
    }
}
