//! Speech service wire protocol
//!
//! JSON-framed messages over the WebSocket. Outbound frames carry
//! base64 PCM in a `realtimeInput` envelope; inbound messages are
//! discriminated by which top-level key is present (`setupComplete`,
//! `error`, `serverContent`) and parsed into a tagged event list.
//! Shapes matching none of the discriminants surface as
//! [`ServerEvent::Unrecognized`] rather than being silently ignored.

use serde::{Deserialize, Serialize};

use crate::audio::EncodedPcmFrame;

// -- Outbound ---------------------------------------------------------------

/// Client → server envelope for one audio frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

/// Audio chunk list inside a realtime input message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// One base64 PCM chunk with its MIME tag.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub data: String,
    pub mime_type: String,
}

impl From<EncodedPcmFrame> for RealtimeInputMessage {
    fn from(frame: EncodedPcmFrame) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    data: frame.data,
                    mime_type: frame.mime_type.to_string(),
                }],
            },
        }
    }
}

/// Client → server session setup, sent once after the socket opens.
///
/// The profile payload is opaque to the pipeline; it selects the system
/// prompt and localization on the service side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: SessionSetup,
}

/// Session parameters inside a setup message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub language: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub user_profile: serde_json::Value,
}

// -- Inbound ----------------------------------------------------------------

/// A parsed inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Handshake finished; the session is live
    SetupComplete,
    /// Fatal server-side error
    ServerError {
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },
    /// Base64 PCM audio to schedule for playback
    Audio(String),
    /// Model text transcript
    ModelText {
        text: String,
        turn_complete: bool,
    },
    /// Transcript of the user's speech
    InputTranscription(String),
    /// User barge-in; reset the playback cursor
    Interrupted,
    /// A message shape this client does not understand
    Unrecognized(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<serde_json::Value>,
    error: Option<RawServerError>,
    server_content: Option<RawServerContent>,
}

#[derive(Debug, Deserialize)]
struct RawServerError {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawModelTurn>,
    input_transcription: Option<RawTranscription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize)]
struct RawModelTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    inline_data: Option<RawInlineData>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct RawTranscription {
    text: Option<String>,
}

/// Parse one inbound text frame into its events.
///
/// A single frame can carry several events (audio parts plus a
/// transcript, for example); they are returned in wire order.
///
/// # Errors
///
/// Returns an error if the frame is not valid JSON. A frame that is
/// valid JSON but matches no known discriminant yields
/// `[ServerEvent::Unrecognized]`, not an error.
pub fn parse_server_message(text: &str) -> crate::Result<Vec<ServerEvent>> {
    let raw: RawServerMessage = serde_json::from_str(text)?;

    let mut events = Vec::new();

    if raw.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(error) = raw.error {
        events.push(ServerEvent::ServerError {
            message: error
                .message
                .unwrap_or_else(|| "server reported an error".to_string()),
            details: error.details,
            hint: error.hint,
        });
    }

    if let Some(content) = raw.server_content {
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }

        if let Some(transcription) = content.input_transcription {
            if let Some(text) = transcription.text {
                events.push(ServerEvent::InputTranscription(text));
            }
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    events.push(ServerEvent::Audio(inline.data));
                }
                if let Some(text) = part.text {
                    events.push(ServerEvent::ModelText {
                        text,
                        turn_complete: content.turn_complete,
                    });
                }
            }
        }
    }

    if events.is_empty() {
        let mut snippet = text.to_string();
        snippet.truncate(120);
        events.push(ServerEvent::Unrecognized(snippet));
    }

    Ok(events)
}
