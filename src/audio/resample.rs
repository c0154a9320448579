//! Resampling and wire-format encoding
//!
//! The speech service mandates 16kHz mono 16-bit PCM input, while capture
//! devices commonly run at 44.1/48kHz. Each captured block is resampled
//! independently with linear interpolation before transmission; no state
//! is carried between blocks.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::WIRE_SAMPLE_RATE;

/// MIME tag attached to every outbound PCM frame
pub const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// A wire-ready audio frame: base64-encoded 16-bit PCM at 16kHz
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPcmFrame {
    /// Base64 of the little-endian i16 sample bytes
    pub data: String,
    /// Always [`PCM_MIME_TYPE`]
    pub mime_type: &'static str,
}

/// Convert a float sample in [-1.0, 1.0] to a 16-bit PCM sample.
///
/// Negative values scale by 32768 and non-negative by 32767 so that both
/// ends of the int16 range are reachable without overflow.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

/// Convert a 16-bit PCM sample back to a float in [-1.0, 1.0].
///
/// Inverse of [`f32_to_i16`]: negative values divide by 32768,
/// non-negative by 32767.
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        f32::from(sample) / 32768.0
    } else {
        f32::from(sample) / 32767.0
    }
}

/// Resample a mono block from `input_rate` to the 16kHz wire rate and
/// convert to 16-bit PCM.
///
/// At 16kHz input this is a direct per-sample conversion and the output
/// length equals the input length. Otherwise the output has
/// `round(len / (input_rate / 16000))` samples, each linearly interpolated
/// between its floor and ceiling source positions (ceiling clamped to the
/// last valid index).
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample_to_wire(samples: &[f32], input_rate: u32) -> Vec<i16> {
    if samples.is_empty() {
        return Vec::new();
    }

    if input_rate == WIRE_SAMPLE_RATE {
        return samples.iter().copied().map(f32_to_i16).collect();
    }

    let ratio = f64::from(input_rate) / f64::from(WIRE_SAMPLE_RATE);
    let output_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let pos = i as f64 * ratio;
        let lo = (pos.floor() as usize).min(last);
        let hi = (pos.ceil() as usize).min(last);
        let frac = (pos - pos.floor()) as f32;

        let interpolated = samples[lo] + (samples[hi] - samples[lo]) * frac;
        out.push(f32_to_i16(interpolated));
    }

    out
}

/// Encode a resampled PCM block as a transport frame.
#[must_use]
pub fn encode_frame(pcm: &[i16]) -> EncodedPcmFrame {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for sample in pcm {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    EncodedPcmFrame {
        data: BASE64.encode(bytes),
        mime_type: PCM_MIME_TYPE,
    }
}

/// Decode a base64 PCM payload from the service into float samples.
///
/// A trailing odd byte (a truncated sample) is discarded.
///
/// # Errors
///
/// Returns an error if the payload is not valid base64.
pub fn decode_inbound_pcm(data: &str) -> crate::Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| crate::Error::Audio(format!("invalid base64 audio payload: {e}")))?;

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}
