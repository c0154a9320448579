//! WebSocket transport to the speech service
//!
//! Owns one persistent bidirectional connection: connect, frame and send
//! outbound audio, surface parsed inbound events, and classify closes.
//! Reconnection policy lives in [`super::reconnect`]; this module only
//! reports what happened.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::protocol::{self, RealtimeInputMessage, ServerEvent, SetupMessage};
use crate::audio::EncodedPcmFrame;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the connection drops without a close frame.
///
/// Matches the abnormal-closure code browsers report; commonly indicates
/// missing server-side credentials rather than a transient fault.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Policy-violation close code
pub const CLOSE_POLICY: u16 = 1008;

/// Server-internal-error close code
pub const CLOSE_INTERNAL: u16 = 1011;

/// What a connection closure means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Terminal; surface a configuration hint, do not retry
    FatalConfig,
    /// Terminal; the server rejected the session, do not retry
    FatalPolicy,
    /// Recoverable; hand off to the reconnection controller
    Recoverable,
}

/// Classify a close code per the session's failure-handling policy.
#[must_use]
pub const fn classify_close(code: u16) -> CloseDisposition {
    match code {
        CLOSE_ABNORMAL => CloseDisposition::FatalConfig,
        CLOSE_POLICY | CLOSE_INTERNAL => CloseDisposition::FatalPolicy,
        _ => CloseDisposition::Recoverable,
    }
}

/// Something the transport produced.
#[derive(Debug)]
pub enum TransportEvent {
    /// Parsed events from one inbound frame, in wire order
    Events(Vec<ServerEvent>),
    /// The connection closed
    Closed {
        /// Close code; [`CLOSE_ABNORMAL`] when the peer vanished without one
        code: u16,
        /// Close reason or error description
        reason: String,
    },
}

/// One live connection to the speech service.
pub struct Transport {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    open: bool,
}

impl Transport {
    /// Open a connection to `url`.
    ///
    /// The caller bounds the whole handshake (socket plus the service's
    /// `setupComplete`) with a timeout; this call only performs the
    /// socket upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the upgrade fails.
    pub async fn connect(url: &Url) -> Result<Self> {
        tracing::debug!(%url, "connecting to speech service");
        let (ws, response) = connect_async(url.as_str()).await?;
        tracing::debug!(status = %response.status(), "websocket upgraded");

        let (sink, stream) = ws.split();
        Ok(Self {
            sink,
            stream,
            open: true,
        })
    }

    /// Whether the connection is usable for sending.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Send the session setup message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the send fails; setup is the
    /// one outbound message that must not be dropped silently.
    pub async fn send_setup(&mut self, setup: &SetupMessage) -> Result<()> {
        let text = serde_json::to_string(setup)?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(Error::from)
    }

    /// Send one encoded audio frame.
    ///
    /// Dropped silently when the connection is not open: a few stale
    /// frames lost during a reconnect beat buffering and replaying them.
    pub async fn send_frame(&mut self, frame: EncodedPcmFrame) {
        if !self.open {
            tracing::trace!("dropping audio frame: connection not open");
            return;
        }

        let message: RealtimeInputMessage = frame.into();
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audio frame");
                return;
            }
        };

        if let Err(e) = self.sink.send(Message::Text(text)).await {
            tracing::debug!(error = %e, "audio send failed; awaiting close");
            self.open = false;
        }
    }

    /// Wait for the next inbound event.
    ///
    /// Non-text frames are skipped. A frame that fails JSON parsing is
    /// logged and skipped; the close path always yields
    /// [`TransportEvent::Closed`] exactly once.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match protocol::parse_server_message(&text) {
                    Ok(events) => return TransportEvent::Events(events),
                    Err(e) => {
                        tracing::warn!(error = %e, "unparseable message from service");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    self.open = false;
                    let (code, reason) = frame.map_or_else(
                        || (CLOSE_ABNORMAL, "closed without a close frame".to_string()),
                        |f| (f.code.into(), f.reason.to_string()),
                    );
                    tracing::debug!(code, %reason, "websocket closed");
                    return TransportEvent::Closed { code, reason };
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by the library; binary frames unused
                }
                Some(Err(e)) => {
                    self.open = false;
                    return TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    };
                }
                None => {
                    self.open = false;
                    return TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "connection dropped".to_string(),
                    };
                }
            }
        }
    }

    /// Close the connection gracefully.
    pub async fn close(&mut self) {
        self.open = false;
        if let Err(e) = self.sink.close().await {
            tracing::trace!(error = %e, "close handshake failed");
        }
    }
}

/// Cheap connectivity probe: can the service host be reached at all?
///
/// Runs before any resource acquisition so a dead network short-circuits
/// to the offline state without touching the microphone.
pub async fn probe_connectivity(url: &Url, timeout: Duration) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let Some(port) = url.port_or_known_default() else {
        return false;
    };

    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, host, port, "connectivity probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(host, port, "connectivity probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_close_is_fatal_config() {
        assert_eq!(classify_close(1006), CloseDisposition::FatalConfig);
    }

    #[test]
    fn policy_closes_are_fatal() {
        assert_eq!(classify_close(1008), CloseDisposition::FatalPolicy);
        assert_eq!(classify_close(1011), CloseDisposition::FatalPolicy);
    }

    #[test]
    fn other_closes_are_recoverable() {
        assert_eq!(classify_close(1000), CloseDisposition::Recoverable);
        assert_eq!(classify_close(1001), CloseDisposition::Recoverable);
        assert_eq!(classify_close(1012), CloseDisposition::Recoverable);
        assert_eq!(classify_close(4000), CloseDisposition::Recoverable);
    }

    #[tokio::test]
    async fn probe_fails_fast_for_unroutable_host() {
        let url = Url::parse("ws://192.0.2.1:9/").unwrap();
        let reachable = probe_connectivity(&url, Duration::from_millis(200)).await;
        assert!(!reachable);
    }
}
