//! Audio output using cpal.

use std::sync::Arc;
use std::time::Duration;

use backbeat_core::{Error, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::mixer::Mixer;

/// Longest the device callback waits for the mixer before emitting silence.
const MIXER_WAIT: Duration = Duration::from_millis(2);

/// Audio output stream configuration.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// Audio output stream pulling from a shared [`Mixer`].
pub struct AudioOutput {
    _stream: Stream,
    config: OutputConfig,
    device_name: String,
}

impl AudioOutput {
    /// Open the default output device.
    pub fn new(mixer: Arc<Mutex<Mixer>>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?;

        Self::with_device(&device, mixer)
    }

    /// Open a specific output device.
    pub fn with_device(device: &Device, mixer: Arc<Mutex<Mixer>>) -> Result<Self> {
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?;

        debug!("Supported output config: {:?}", supported_config);

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        let output_config = OutputConfig {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(device, &config, mixer)?,
            SampleFormat::I16 => Self::build_stream::<i16>(device, &config, mixer)?,
            SampleFormat::U16 => Self::build_stream::<u16>(device, &config, mixer)?,
            _ => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            config: output_config,
            device_name,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        mixer: Arc<Mutex<Mixer>>,
    ) -> Result<Stream> {
        let channels = usize::from(config.channels);
        let sample_rate = config.sample_rate.0;
        let mut scratch: Vec<f32> = Vec::new();

        let err_fn = |err| {
            error!("Audio stream error: {err}");
        };

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);

                    if let Some(mut mixer) = mixer.try_lock_for(MIXER_WAIT) {
                        mixer.render(&mut scratch, channels, sample_rate);
                    } else {
                        trace!("Mixer busy, writing silence");
                        scratch.fill(0.0);
                    }

                    for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(soft_clip(s));
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))?;

        Ok(stream)
    }

    pub const fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.config.channels
    }
}

/// Smoothly limit samples that approach full scale.
fn soft_clip(s: f32) -> f32 {
    if s.abs() > 0.9 {
        s.tanh()
    } else {
        s
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}
