//! Voice session orchestration
//!
//! One [`VoiceSession`] owns every mutable piece of a live conversation:
//! the microphone, the playback scheduler, the level meter, the
//! transport, the transcript, and the reconnection budget. Sessions are
//! constructed at connect time, never reused, and every exit path
//! funnels through the same teardown so no handle outlives the session.

mod protocol;
mod reconnect;
mod transport;

pub use protocol::{
    MediaChunk, RealtimeInput, RealtimeInputMessage, ServerEvent, SessionSetup, SetupMessage,
    parse_server_message,
};
pub use reconnect::{ConnectionState, ReconnectController, RetryPolicy, delay_for_attempt};
pub use transport::{
    CLOSE_ABNORMAL, CLOSE_INTERNAL, CLOSE_POLICY, CloseDisposition, Transport, TransportEvent,
    classify_close, probe_connectivity,
};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use uuid::Uuid;

use crate::audio::{
    Analyser, AudioCapture, LevelMeter, PlaybackScheduler, decode_inbound_pcm, encode_frame,
    resample_to_wire,
};
use crate::config::SessionConfig;
use crate::events::SessionEvent;
use crate::transcript::{Role, TranscriptLog};

/// Level meter poll cadence; the headless analogue of a display frame
const LEVEL_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Hint surfaced on an abnormal (1006) close
const ABNORMAL_CLOSE_HINT: &str =
    "the service closed the connection abnormally; check the bridge credentials and service URL";

/// Remote control for a running session.
///
/// Dropping the last handle also signals a stop; a session nobody can
/// reach must not keep the microphone.
#[derive(Clone)]
pub struct SessionHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Request a stop. Idempotent; the session tears down and settles
    /// in the idle state.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// How the live loop ended.
enum LoopOutcome {
    /// User requested stop
    Stopped,
    /// Terminal failure; no retry
    Fatal {
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },
    /// Unexpected close while connected; retry within budget
    Recoverable { reason: String },
}

/// How a connection attempt ended.
enum Established {
    Ready(Transport, Vec<ServerEvent>),
    Fatal {
        message: String,
        details: Option<String>,
        hint: Option<String>,
    },
    Retry { reason: String },
}

/// A single voice conversation with the speech service.
pub struct VoiceSession {
    id: Uuid,
    config: SessionConfig,
    events: UnboundedSender<SessionEvent>,
    stop_rx: watch::Receiver<bool>,
    state: ConnectionState,
    transcript: TranscriptLog,
}

impl VoiceSession {
    /// Create a session and the channel its events arrive on.
    #[must_use]
    pub fn new(
        config: SessionConfig,
    ) -> (Self, SessionHandle, UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let session = Self {
            id: Uuid::new_v4(),
            config,
            events: event_tx,
            stop_rx,
            state: ConnectionState::Idle,
            transcript: TranscriptLog::new(),
        };
        let handle = SessionHandle {
            stop: Arc::new(stop_tx),
        };

        (session, handle, event_rx)
    }

    /// The state the session last settled in.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Holds the microphone and output device for the session lifetime
    /// and reconnects on recoverable failures within the retry budget.
    /// The future is not `Send` (it owns platform audio streams); drive
    /// it on the main task rather than `tokio::spawn`.
    ///
    /// # Errors
    ///
    /// Failures are reported as [`SessionEvent`]s and a settled state,
    /// not as `Err`; the error return covers only event-channel setup
    /// issues and is currently always `Ok`.
    pub async fn run(mut self) -> crate::Result<()> {
        tracing::info!(session = %self.id, url = %self.config.service_url, "voice session starting");
        let mut controller = ReconnectController::new(self.config.retry.clone());

        loop {
            if *self.stop_rx.borrow() {
                self.set_state(ConnectionState::Idle);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            // Offline short-circuits before the microphone is touched
            if !probe_connectivity(&self.config.service_url, self.config.probe_timeout).await {
                self.set_state(ConnectionState::Offline);
                self.emit(SessionEvent::error(
                    "no network connectivity; check your connection and try again",
                ));
                return Ok(());
            }

            // Fresh media stack per attempt; the previous one was torn
            // down before we got here
            let input_analyser = Arc::new(Analyser::new());
            let output_analyser = Arc::new(Analyser::new());
            let (block_tx, mut block_rx) = mpsc::unbounded_channel();

            let mut capture = match self.acquire_capture(&block_tx, &input_analyser) {
                Ok(capture) => capture,
                Err(e) => {
                    self.fail_terminal(e.to_string(), None, None);
                    return Ok(());
                }
            };
            let mut playback = match PlaybackScheduler::open(Arc::clone(&output_analyser)) {
                Ok(playback) => playback,
                Err(e) => {
                    capture.stop();
                    self.fail_terminal(e.to_string(), None, None);
                    return Ok(());
                }
            };
            let mut meter = LevelMeter::new(input_analyser, output_analyser);

            // The capture callback now holds the only sender; a dead
            // stream closes the channel and surfaces in the live loop
            drop(block_tx);

            let mut transport = match self.establish().await {
                Established::Ready(transport, pending) => {
                    self.set_state(ConnectionState::Connected);
                    controller.on_connected();
                    // Events that rode in alongside setupComplete; never
                    // fatal (establish already filtered server errors)
                    for event in pending {
                        let _ = self.dispatch(event, &mut playback);
                    }
                    transport
                }
                Established::Retry { reason } => {
                    teardown_media(&mut capture, &mut playback);
                    if self.backoff(&mut controller, &reason).await {
                        continue;
                    }
                    return Ok(());
                }
                Established::Fatal {
                    message,
                    details,
                    hint,
                } => {
                    teardown_media(&mut capture, &mut playback);
                    self.fail_terminal(message, details, hint);
                    return Ok(());
                }
            };

            // Frames are only sent while the connection is open; audio
            // captured during the handshake is stale, not queued
            while block_rx.try_recv().is_ok() {}

            let outcome = self
                .live_loop(
                    &mut transport,
                    &mut block_rx,
                    capture.sample_rate(),
                    &mut playback,
                    &mut meter,
                )
                .await;

            teardown_media(&mut capture, &mut playback);
            transport.close().await;

            match outcome {
                LoopOutcome::Stopped => {
                    self.set_state(ConnectionState::Idle);
                    tracing::info!(session = %self.id, "voice session stopped");
                    return Ok(());
                }
                LoopOutcome::Fatal {
                    message,
                    details,
                    hint,
                } => {
                    self.fail_terminal(message, details, hint);
                    return Ok(());
                }
                LoopOutcome::Recoverable { reason } => {
                    if self.backoff(&mut controller, &reason).await {
                        continue;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Acquire the microphone and start block delivery.
    fn acquire_capture(
        &self,
        block_tx: &UnboundedSender<Vec<f32>>,
        analyser: &Arc<Analyser>,
    ) -> crate::Result<AudioCapture> {
        let mut capture = AudioCapture::new()?;
        capture.start(block_tx.clone(), Arc::clone(analyser))?;
        Ok(capture)
    }

    /// Connect and complete the service handshake within the timeout.
    ///
    /// The handshake is not just the socket upgrade: the attempt only
    /// counts once `setupComplete` arrives.
    async fn establish(&self) -> Established {
        let setup = SetupMessage {
            setup: SessionSetup {
                language: self.config.language.clone(),
                user_profile: self.config.user_profile.clone(),
            },
        };

        let handshake = async {
            let mut transport = match Transport::connect(&self.config.service_url).await {
                Ok(transport) => transport,
                Err(e) => {
                    return Established::Retry {
                        reason: format!("connection failed: {e}"),
                    };
                }
            };

            if let Err(e) = transport.send_setup(&setup).await {
                return Established::Retry {
                    reason: format!("setup send failed: {e}"),
                };
            }

            let mut pending = Vec::new();
            loop {
                match transport.next_event().await {
                    TransportEvent::Events(events) => {
                        let mut complete = false;
                        for event in events {
                            match event {
                                ServerEvent::SetupComplete => complete = true,
                                ServerEvent::ServerError {
                                    message,
                                    details,
                                    hint,
                                } => {
                                    return Established::Fatal {
                                        message,
                                        details,
                                        hint,
                                    };
                                }
                                other => pending.push(other),
                            }
                        }
                        if complete {
                            return Established::Ready(transport, pending);
                        }
                    }
                    TransportEvent::Closed { code, reason } => {
                        return match classify_close(code) {
                            CloseDisposition::FatalConfig => Established::Fatal {
                                message: format!("connection closed abnormally: {reason}"),
                                details: Some(format!("close code {code}")),
                                hint: Some(ABNORMAL_CLOSE_HINT.to_string()),
                            },
                            CloseDisposition::FatalPolicy => Established::Fatal {
                                message: format!(
                                    "service rejected the session (code {code}): {reason}"
                                ),
                                details: None,
                                hint: None,
                            },
                            CloseDisposition::Recoverable => Established::Retry {
                                reason: format!("closed during handshake (code {code})"),
                            },
                        };
                    }
                }
            }
        };

        match tokio::time::timeout(self.config.handshake_timeout, handshake).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.config.handshake_timeout,
                    "handshake timed out"
                );
                Established::Retry {
                    reason: "handshake timed out".to_string(),
                }
            }
        }
    }

    /// The connected steady state: capture out, playback in, meter on a
    /// frame-rate tick, until something ends it.
    async fn live_loop(
        &mut self,
        transport: &mut Transport,
        blocks: &mut UnboundedReceiver<Vec<f32>>,
        capture_rate: u32,
        playback: &mut PlaybackScheduler,
        meter: &mut LevelMeter,
    ) -> LoopOutcome {
        enum Step {
            Stop,
            Block(Option<Vec<f32>>),
            Inbound(TransportEvent),
            Tick,
        }

        let mut ticker = tokio::time::interval(LEVEL_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let step = tokio::select! {
                _ = self.stop_rx.changed() => Step::Stop,
                block = blocks.recv() => Step::Block(block),
                event = transport.next_event() => Step::Inbound(event),
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Stop => return LoopOutcome::Stopped,
                Step::Block(Some(block)) => {
                    let pcm = resample_to_wire(&block, capture_rate);
                    transport.send_frame(encode_frame(&pcm)).await;
                }
                Step::Block(None) => {
                    return LoopOutcome::Fatal {
                        message: "audio capture stopped delivering".to_string(),
                        details: None,
                        hint: None,
                    };
                }
                Step::Inbound(TransportEvent::Events(events)) => {
                    for event in events {
                        if let Some(outcome) = self.dispatch(event, playback) {
                            return outcome;
                        }
                    }
                }
                Step::Inbound(TransportEvent::Closed { code, reason }) => {
                    return match classify_close(code) {
                        CloseDisposition::FatalConfig => LoopOutcome::Fatal {
                            message: format!("connection closed abnormally: {reason}"),
                            details: Some(format!("close code {code}")),
                            hint: Some(ABNORMAL_CLOSE_HINT.to_string()),
                        },
                        CloseDisposition::FatalPolicy => LoopOutcome::Fatal {
                            message: format!(
                                "service rejected the session (code {code}): {reason}"
                            ),
                            details: None,
                            hint: None,
                        },
                        CloseDisposition::Recoverable => LoopOutcome::Recoverable {
                            reason: format!("connection closed (code {code}): {reason}"),
                        },
                    };
                }
                Step::Tick => {
                    let level = meter.poll();
                    self.emit(SessionEvent::Level(level));
                }
            }
        }
    }

    /// Apply one inbound event. Returns an outcome only when the event
    /// ends the live loop.
    fn dispatch(
        &mut self,
        event: ServerEvent,
        playback: &mut PlaybackScheduler,
    ) -> Option<LoopOutcome> {
        match event {
            ServerEvent::SetupComplete => {
                // Duplicate after handshake; harmless
            }
            ServerEvent::ServerError {
                message,
                details,
                hint,
            } => {
                return Some(LoopOutcome::Fatal {
                    message,
                    details,
                    hint,
                });
            }
            ServerEvent::Audio(data) => match decode_inbound_pcm(&data) {
                Ok(samples) => {
                    playback.schedule(samples);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable audio part");
                }
            },
            ServerEvent::ModelText {
                text,
                turn_complete,
            } => {
                if turn_complete {
                    self.append_transcript(Role::Model, &text);
                } else {
                    tracing::trace!("partial model text ignored");
                }
            }
            ServerEvent::InputTranscription(text) => {
                self.append_transcript(Role::User, &text);
            }
            ServerEvent::Interrupted => {
                tracing::debug!("barge-in; resetting playback cursor");
                playback.interrupt();
            }
            ServerEvent::Unrecognized(snippet) => {
                tracing::warn!(%snippet, "unrecognized message from service");
            }
        }
        None
    }

    fn append_transcript(&mut self, role: Role, text: &str) {
        if let Some(entry) = self.transcript.push(role, text) {
            let entry = entry.clone();
            self.emit(SessionEvent::Transcript(entry));
        }
    }

    /// Wait out the backoff delay before the next attempt.
    ///
    /// Returns `false` when the budget is exhausted (session settles in
    /// the error state) or the user stopped during the wait.
    async fn backoff(&mut self, controller: &mut ReconnectController, reason: &str) -> bool {
        let Some(delay) = controller.next_retry() else {
            self.fail_terminal(
                format!(
                    "connection lost and not recovered after {} attempts: {reason}",
                    controller.policy().max_attempts
                ),
                None,
                None,
            );
            return false;
        };

        self.set_state(ConnectionState::Reconnecting);
        tracing::info!(?delay, attempt = controller.attempts(), reason, "reconnecting");

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.stop_rx.changed() => {
                self.set_state(ConnectionState::Idle);
                false
            }
        }
    }

    fn fail_terminal(&mut self, message: String, details: Option<String>, hint: Option<String>) {
        tracing::error!(%message, "session failed");
        self.set_state(ConnectionState::Error);
        self.emit(SessionEvent::Error {
            message,
            details,
            hint,
        });
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::info!(from = %self.state, to = %state, "connection state");
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Best-effort: a departed UI must never stall the pipeline
        let _ = self.events.send(event);
    }
}

/// Release the audio devices. Both stops are idempotent; every exit
/// path calls this before returning or retrying.
fn teardown_media(capture: &mut AudioCapture, playback: &mut PlaybackScheduler) {
    capture.stop();
    playback.stop();
}
