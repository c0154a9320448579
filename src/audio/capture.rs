//! Microphone capture
//!
//! Acquires an exclusive input stream and emits fixed-size mono blocks
//! at the device's native rate. The resampler downstream handles rate
//! conversion, so capture prefers 16kHz but accepts whatever the device
//! offers.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc::UnboundedSender;

use super::level::Analyser;
use super::resample::f32_to_i16;
use super::WIRE_SAMPLE_RATE;
use crate::{Error, Result};

/// Samples per emitted capture block
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Captures audio from the default input device in fixed-size blocks.
pub struct AudioCapture {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new capture instance.
    ///
    /// Prefers a mono 16kHz configuration; falls back to the device's
    /// default when the preferred shape is unsupported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no input device exists or
    /// no configuration can be negotiated, and [`Error::PermissionDenied`]
    /// if the platform refuses access.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device".to_string()))?;

        let config = preferred_config(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            stream: None,
        })
    }

    /// Start capturing.
    ///
    /// Complete [`CAPTURE_BLOCK_SIZE`]-sample mono blocks are pushed
    /// through `analyser` and sent on `blocks`; a partial trailing block
    /// stays buffered until filled. Dropping the receiver stops delivery
    /// without stopping the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] or [`Error::DeviceUnavailable`]
    /// if the stream cannot be built.
    pub fn start(
        &mut self,
        blocks: UnboundedSender<Vec<f32>>,
        analyser: Arc<Analyser>,
    ) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = self.config.channels as usize;
        let pending = Arc::new(Mutex::new(Vec::with_capacity(CAPTURE_BLOCK_SIZE * 2)));

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let Ok(mut buf) = pending.lock() else {
                        return;
                    };
                    downmix_into(&mut buf, data, channels);

                    while buf.len() >= CAPTURE_BLOCK_SIZE {
                        let block: Vec<f32> = buf.drain(..CAPTURE_BLOCK_SIZE).collect();
                        analyser.push(&block);
                        if blocks.send(block).is_err() {
                            // Receiver gone; keep draining so the buffer stays bounded
                            buf.clear();
                            return;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(classify_build_error)?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing and release the device.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Whether the input stream is currently held.
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// The device rate blocks are captured at.
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Negotiate the input configuration: mono at 16kHz if supported,
/// otherwise the device default.
fn preferred_config(device: &Device) -> Result<StreamConfig> {
    let supported = device
        .supported_input_configs()
        .map_err(classify_config_error)?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(WIRE_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(WIRE_SAMPLE_RATE)
        });

    if let Some(config) = supported {
        return Ok(config.with_sample_rate(SampleRate(WIRE_SAMPLE_RATE)).config());
    }

    let default = device
        .default_input_config()
        .map_err(classify_config_error)?;
    Ok(default.config())
}

/// Average interleaved frames down to mono and append to `buf`.
#[allow(clippy::cast_precision_loss)]
fn downmix_into(buf: &mut Vec<f32>, data: &[f32], channels: usize) {
    if channels <= 1 {
        buf.extend_from_slice(data);
        return;
    }
    buf.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

fn classify_build_error(err: cpal::BuildStreamError) -> Error {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            Error::DeviceUnavailable("input device disappeared".to_string())
        }
        other => classify_message(&other.to_string()),
    }
}

fn classify_config_error(err: impl std::fmt::Display) -> Error {
    classify_message(&err.to_string())
}

/// Platform backends report permission refusals as backend-specific
/// strings; match on the common phrasings.
fn classify_message(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("access") {
        Error::PermissionDenied(message.to_string())
    } else {
        Error::DeviceUnavailable(message.to_string())
    }
}

/// Convert f32 samples to WAV bytes for debug recordings.
///
/// # Errors
///
/// Returns an error if WAV encoding fails.
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(f32_to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
