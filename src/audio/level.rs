//! Audio level metering
//!
//! Taps the capture and playback paths through [`Analyser`] nodes and
//! derives a smoothed 0..1 intensity signal for visual feedback. The
//! meter is polled at display rate, not audio rate; snapshots are
//! non-destructive so polling never perturbs the audio path.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// FFT window size for analyser snapshots
const WINDOW_SIZE: usize = 1024;

/// Exponential moving average factor for the smoothed level
const SMOOTHING_FACTOR: f32 = 0.18;

/// Gain applied to the raw spectrum average before clamping to 0..1
const METER_GAIN: f32 = 6.0;

/// A non-destructive tap on an audio path.
///
/// Audio callbacks push samples as they flow; [`Analyser::snapshot`]
/// computes the magnitude spectrum of the most recent window without
/// consuming anything.
pub struct Analyser {
    ring: Mutex<VecDeque<f32>>,
    fft: Arc<dyn Fft<f32>>,
}

impl Analyser {
    /// Create a new analyser tap.
    #[must_use]
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            ring: Mutex::new(VecDeque::with_capacity(WINDOW_SIZE)),
            fft: planner.plan_fft_forward(WINDOW_SIZE),
        }
    }

    /// Push samples from an audio callback, keeping only the latest window.
    pub fn push(&self, samples: &[f32]) {
        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        for &s in samples {
            if ring.len() == WINDOW_SIZE {
                ring.pop_front();
            }
            ring.push_back(s);
        }
    }

    /// Magnitude spectrum of the latest window (positive frequencies only).
    ///
    /// Returns an empty vector until a full window has accumulated.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> Vec<f32> {
        let windowed: Vec<f32> = {
            let Ok(ring) = self.ring.lock() else {
                return Vec::new();
            };
            if ring.len() < WINDOW_SIZE {
                return Vec::new();
            }
            ring.iter()
                .enumerate()
                .map(|(i, &sample)| {
                    let hann = 0.5
                        * (1.0
                            - (2.0 * std::f32::consts::PI * i as f32
                                / (WINDOW_SIZE - 1) as f32)
                                .cos());
                    sample * hann
                })
                .collect()
        };

        let mut buf: Vec<Complex<f32>> =
            windowed.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.fft.process(&mut buf);

        // Positive frequencies only, normalized so a full-scale sine peaks near 1
        buf.iter()
            .take(WINDOW_SIZE / 2)
            .map(|c| c.norm() / (WINDOW_SIZE as f32 / 2.0))
            .collect()
    }
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new()
    }
}

/// Smoothed 0..1 intensity derived from the input and output analysers.
pub struct LevelMeter {
    input: Arc<Analyser>,
    output: Arc<Analyser>,
    smoothed: f32,
}

impl LevelMeter {
    /// Create a meter over the given analyser taps.
    #[must_use]
    pub fn new(input: Arc<Analyser>, output: Arc<Analyser>) -> Self {
        Self {
            input,
            output,
            smoothed: 0.0,
        }
    }

    /// Sample both taps and advance the smoothed level by one frame.
    ///
    /// The instantaneous level is the max of the two spectrum averages;
    /// smoothing follows `smoothed += (instant - smoothed) * factor`.
    pub fn poll(&mut self) -> f32 {
        let instant = Self::spectrum_average(&self.input)
            .max(Self::spectrum_average(&self.output))
            .min(1.0);

        self.smoothed += (instant - self.smoothed) * SMOOTHING_FACTOR;
        self.smoothed
    }

    /// Current smoothed level without advancing.
    #[must_use]
    pub const fn level(&self) -> f32 {
        self.smoothed
    }

    #[allow(clippy::cast_precision_loss)]
    fn spectrum_average(analyser: &Analyser) -> f32 {
        let spectrum = analyser.snapshot();
        if spectrum.is_empty() {
            return 0.0;
        }

        let mean = spectrum.iter().sum::<f32>() / spectrum.len() as f32;
        mean * METER_GAIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, rate: f32, count: usize, amplitude: f32) -> Vec<f32> {
        (0..count)
            .map(|i| {
                let t = i as f32 / rate;
                amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
            })
            .collect()
    }

    #[test]
    fn snapshot_empty_until_window_fills() {
        let analyser = Analyser::new();
        analyser.push(&vec![0.5; WINDOW_SIZE / 2]);
        assert!(analyser.snapshot().is_empty());

        analyser.push(&vec![0.5; WINDOW_SIZE / 2]);
        assert_eq!(analyser.snapshot().len(), WINDOW_SIZE / 2);
    }

    #[test]
    fn snapshot_is_non_destructive() {
        let analyser = Analyser::new();
        analyser.push(&sine(440.0, 16000.0, WINDOW_SIZE, 0.8));

        let first = analyser.snapshot();
        let second = analyser.snapshot();
        assert_eq!(first, second);
    }

    #[test]
    fn tone_has_more_energy_than_silence() {
        let loud = Analyser::new();
        loud.push(&sine(440.0, 16000.0, WINDOW_SIZE, 0.8));
        let quiet = Analyser::new();
        quiet.push(&vec![0.0; WINDOW_SIZE]);

        let loud_avg: f32 = loud.snapshot().iter().sum();
        let quiet_avg: f32 = quiet.snapshot().iter().sum();
        assert!(loud_avg > quiet_avg);
    }

    #[test]
    fn meter_rises_toward_signal_and_decays() {
        let input = Arc::new(Analyser::new());
        let output = Arc::new(Analyser::new());
        let mut meter = LevelMeter::new(Arc::clone(&input), Arc::clone(&output));

        input.push(&sine(440.0, 16000.0, WINDOW_SIZE, 0.9));

        let mut last = 0.0;
        for _ in 0..10 {
            let level = meter.poll();
            assert!(level >= last, "level should rise monotonically toward signal");
            last = level;
        }
        assert!(last > 0.0);

        // Feed silence; the smoothed level decays but never goes negative
        input.push(&vec![0.0; WINDOW_SIZE]);
        let mut prev = last;
        for _ in 0..20 {
            let level = meter.poll();
            assert!(level <= prev);
            assert!(level >= 0.0);
            prev = level;
        }
        assert!(prev < last);
    }

    #[test]
    fn meter_takes_max_of_both_paths() {
        let input = Arc::new(Analyser::new());
        let output = Arc::new(Analyser::new());

        // Only the output path carries signal
        output.push(&sine(440.0, 24000.0, WINDOW_SIZE, 0.9));

        let mut meter = LevelMeter::new(input, output);
        for _ in 0..10 {
            meter.poll();
        }
        assert!(meter.level() > 0.0);
    }
}
