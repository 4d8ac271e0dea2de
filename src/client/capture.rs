//! Microphone capture for the native client

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::adapters::INPUT_SAMPLE_RATE;
use crate::{Error, Result};

/// Captures audio from the default input device
///
/// Prefers a direct 16 kHz mono stream; falls back to the device's
/// native rate and resamples on drain.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    device_rate: u32,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns an error if no input device or usable config exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
            });

        let (config, device_rate) = match supported {
            Some(c) => (
                c.with_sample_rate(SampleRate(INPUT_SAMPLE_RATE)).config(),
                INPUT_SAMPLE_RATE,
            ),
            None => {
                let c = device
                    .default_input_config()
                    .map_err(|e| Error::Audio(e.to_string()))?;
                let rate = c.sample_rate().0;
                tracing::debug!(rate, "device lacks 16 kHz mono, resampling on drain");
                (c.config(), rate)
            }
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = device_rate,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            device_rate,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns an error if the input stream cannot be opened
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let channels = self.config.channels as usize;
        let config = self.config.clone();

        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        if channels == 1 {
                            buf.extend_from_slice(data);
                        } else {
                            // downmix interleaved frames to mono
                            buf.extend(data.chunks(channels).map(|frame| {
                                frame.iter().sum::<f32>() / frame.len() as f32
                            }));
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Drain the raw captured samples at the device rate
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Drain captured audio as one 16 kHz PCM16 frame
    ///
    /// Returns an empty vec when nothing was captured since last drain.
    ///
    /// # Errors
    ///
    /// Returns an error if resampling fails
    pub fn take_frame_pcm(&self) -> Result<Vec<u8>> {
        let samples = self.take_buffer();
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let samples = resample_to_input_rate(&samples, self.device_rate)?;
        Ok(samples_to_pcm16(&samples))
    }
}

/// Resample mono f32 samples to the 16 kHz pipeline rate
///
/// # Errors
///
/// Returns an error if the resampler rejects the input
pub fn resample_to_input_rate(samples: &[f32], from_rate: u32) -> Result<Vec<f32>> {
    if from_rate == INPUT_SAMPLE_RATE || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        f64::from(INPUT_SAMPLE_RATE) / f64::from(from_rate),
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| Error::Audio(e.to_string()))?;

    let mut output = resampler
        .process(&[samples.to_vec()], None)
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok(output.pop().unwrap_or_default())
}

/// Convert f32 samples to little-endian PCM16 bytes
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            #[allow(clippy::cast_possible_truncation)]
            let sample = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            sample.to_le_bytes()
        })
        .collect()
}
