//! Gapless playback scheduling
//!
//! Inbound 24kHz PCM buffers are scheduled against a monotonic playback
//! cursor: each buffer starts at `max(cursor, now)` and advances the
//! cursor by its duration, so arrival order is playback order and
//! back-to-back buffers play without gaps. A barge-in resets the cursor
//! to the current clock position and discards any scheduling lead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::level::Analyser;
use super::PLAYBACK_SAMPLE_RATE;
use crate::{Error, Result};

/// A position source on the output audio timeline.
pub trait OutputClock: Send + Sync {
    /// Current position in seconds.
    fn now(&self) -> f64;
}

/// Clock driven by the number of frames the output device has consumed.
pub struct StreamClock {
    frames: Arc<AtomicU64>,
    rate: u32,
}

impl StreamClock {
    fn new(frames: Arc<AtomicU64>, rate: u32) -> Self {
        Self { frames, rate }
    }
}

impl OutputClock for StreamClock {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / f64::from(self.rate)
    }
}

/// Manually advanced clock for driving the scheduler in tests.
#[derive(Default)]
pub struct ManualClock {
    seconds: Mutex<f64>,
}

impl ManualClock {
    /// Create a clock at position zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, seconds: f64) {
        if let Ok(mut t) = self.seconds.lock() {
            *t += seconds;
        }
    }

    /// Jump the clock to an absolute position.
    pub fn set(&self, seconds: f64) {
        if let Ok(mut t) = self.seconds.lock() {
            *t = seconds;
        }
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        self.seconds.lock().map(|t| *t).unwrap_or_default()
    }
}

/// One scheduled buffer in the playback queue.
struct ScheduledBuffer {
    start: f64,
    samples: Vec<f32>,
    pos: usize,
}

/// Schedules decoded audio for gapless sequential playback.
pub struct PlaybackScheduler {
    clock: Arc<dyn OutputClock>,
    cursor: f64,
    queue: Arc<Mutex<VecDeque<ScheduledBuffer>>>,
    stream: Option<Stream>,
}

impl PlaybackScheduler {
    /// Create a scheduler without an output device, driven by `clock`.
    ///
    /// Used in tests and by headless consumers; [`PlaybackScheduler::open`]
    /// is the production entry point.
    #[must_use]
    pub fn new(clock: Arc<dyn OutputClock>) -> Self {
        Self {
            clock,
            cursor: 0.0,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            stream: None,
        }
    }

    /// Open the default output device at 24kHz and start the stream.
    ///
    /// Scheduled samples are routed through `analyser` on their way out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no output device exists and
    /// [`Error::Audio`] if no usable configuration is found or the stream
    /// cannot be built.
    pub fn open(analyser: Arc<Analyser>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: stereo, mono samples duplicated to both channels
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        let channels = config.channels as usize;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "playback scheduler initialized"
        );

        let frames = Arc::new(AtomicU64::new(0));
        let clock: Arc<dyn OutputClock> =
            Arc::new(StreamClock::new(Arc::clone(&frames), PLAYBACK_SAMPLE_RATE));

        let queue: Arc<Mutex<VecDeque<ScheduledBuffer>>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let queue_cb = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut played = frames.load(Ordering::Acquire);
                    let mut tap = Vec::with_capacity(data.len() / channels);

                    if let Ok(mut queue) = queue_cb.lock() {
                        for frame in data.chunks_mut(channels) {
                            #[allow(clippy::cast_precision_loss)]
                            let t = played as f64 / f64::from(PLAYBACK_SAMPLE_RATE);
                            let sample = next_sample(&mut queue, t);

                            for out in frame.iter_mut() {
                                *out = sample;
                            }
                            tap.push(sample);
                            played += 1;
                        }
                    } else {
                        for out in data.iter_mut() {
                            *out = 0.0;
                        }
                        played += (data.len() / channels) as u64;
                    }

                    frames.store(played, Ordering::Release);
                    analyser.push(&tap);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            clock,
            cursor: 0.0,
            queue,
            stream: Some(stream),
        })
    }

    /// Schedule a decoded 24kHz mono buffer and return its start time.
    ///
    /// The start time is `max(cursor, now)`: a cursor that has fallen
    /// behind real time is clamped forward rather than scheduling into
    /// the past.
    #[allow(clippy::cast_precision_loss)]
    pub fn schedule(&mut self, samples: Vec<f32>) -> f64 {
        if samples.is_empty() {
            return self.cursor;
        }

        let now = self.clock.now();
        let start = self.cursor.max(now);
        let duration = samples.len() as f64 / f64::from(PLAYBACK_SAMPLE_RATE);

        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(ScheduledBuffer {
                start,
                samples,
                pos: 0,
            });
        }

        self.cursor = start + duration;
        tracing::trace!(start, duration, cursor = self.cursor, "buffer scheduled");
        start
    }

    /// Barge-in: discard everything not yet played and restart from now.
    pub fn interrupt(&mut self) {
        if let Ok(mut queue) = self.queue.lock() {
            let dropped = queue.len();
            queue.clear();
            if dropped > 0 {
                tracing::debug!(dropped, "discarded scheduled audio on interruption");
            }
        }
        self.cursor = self.clock.now();
    }

    /// Current playback cursor position in seconds.
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Current output clock position in seconds.
    #[must_use]
    pub fn clock_now(&self) -> f64 {
        self.clock.now()
    }

    /// Whether all scheduled audio has been handed to the device.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.queue
            .lock()
            .map(|q| q.iter().all(|b| b.pos >= b.samples.len()))
            .unwrap_or(true)
    }

    /// Stop the output stream and drop all scheduled audio.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("playback stream stopped");
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
        self.cursor = 0.0;
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pull the sample due at time `t` from the front of the queue.
///
/// Buffers are strictly ordered by start time, so only the front can be
/// due; exhausted buffers are popped as they complete.
fn next_sample(queue: &mut VecDeque<ScheduledBuffer>, t: f64) -> f32 {
    while let Some(front) = queue.front_mut() {
        if front.pos >= front.samples.len() {
            queue.pop_front();
            continue;
        }
        if t + 1e-9 >= front.start {
            let sample = front.samples[front.pos];
            front.pos += 1;
            return sample;
        }
        break;
    }
    0.0
}
