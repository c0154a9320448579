//! Kisan Voice - real-time voice assistant pipeline
//!
//! This library implements the audio pipeline behind the Kisan Mitra
//! farmer companion's voice assistant:
//! - Microphone capture in fixed-size blocks
//! - Resampling/encoding to the 16kHz PCM wire format
//! - A persistent WebSocket session with the speech-to-speech service
//! - Gapless scheduling of the 24kHz audio the service streams back
//! - A smoothed audio level for visual feedback
//! - Automatic reconnection with capped exponential backoff
//!
//! # Architecture
//!
//! ```text
//!  mic ──► Capture ──► Resample/Encode ──► Transport ──► speech service
//!            │                                 │
//!            ▼                                 ▼
//!         Analyser ◄──── Playback ◄──────── decode
//!            │            Scheduler
//!            ▼
//!        Level Meter ──► SessionEvent::Level
//!
//!  Reconnection Controller wraps the Transport lifecycle
//! ```
//!
//! The surrounding app consumes the pipeline through [`SessionConfig`]
//! in and [`SessionEvent`] out; everything else is session-internal.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod transcript;

pub use config::{ConfigFile, SessionConfig};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use session::{ConnectionState, RetryPolicy, SessionHandle, VoiceSession};
pub use transcript::{Role, TranscriptEntry, TranscriptLog};
