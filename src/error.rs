//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access was denied by the platform
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device is present
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Transport/connection error
    #[error("transport error: {0}")]
    Transport(String),

    /// Connection handshake did not complete in time
    #[error("handshake timed out: {0}")]
    Handshake(String),

    /// No network connectivity at connect time
    #[error("network offline")]
    Offline,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
