//! Audio pipeline module
//!
//! Handles microphone capture, resampling to the wire format, gapless
//! playback scheduling, and level metering. The transport that carries
//! the encoded frames lives in `session`.

mod capture;
mod level;
mod playback;
mod resample;

pub use capture::{AudioCapture, CAPTURE_BLOCK_SIZE, samples_to_wav};
pub use level::{Analyser, LevelMeter};
pub use playback::{ManualClock, OutputClock, PlaybackScheduler, StreamClock};
pub use resample::{
    EncodedPcmFrame, PCM_MIME_TYPE, decode_inbound_pcm, encode_frame, f32_to_i16, i16_to_f32,
    resample_to_wire,
};

/// Sample rate the speech service requires for input audio (Hz)
pub const WIRE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio the speech service sends back (Hz)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;
