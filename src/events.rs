//! Events emitted across the pipeline boundary
//!
//! The surrounding UI consumes these to render connection status, the
//! conversation transcript, the audio level animation, and error
//! surfaces. Delivery is best-effort over an unbounded channel; a
//! dropped receiver never stalls the pipeline.

use crate::session::ConnectionState;
use crate::transcript::TranscriptEntry;

/// An event emitted by a running voice session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection lifecycle state changed
    StateChanged(ConnectionState),
    /// A transcript entry was appended
    Transcript(TranscriptEntry),
    /// Smoothed 0..1 audio level, refreshed at display rate
    Level(f32),
    /// A failure surfaced to the user
    Error {
        /// Human-readable summary
        message: String,
        /// Server-provided detail, if any
        details: Option<String>,
        /// Remediation hint, if any
        hint: Option<String>,
    },
}

impl SessionEvent {
    /// Build an error event from just a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    /// Build an error event with a remediation hint.
    #[must_use]
    pub fn error_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            details: None,
            hint: Some(hint.into()),
        }
    }
}
