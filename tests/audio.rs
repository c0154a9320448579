//! Audio pipeline integration tests
//!
//! Exercises the resample/encode/decode/schedule path without audio
//! hardware.

use std::sync::Arc;

use kisan_voice::audio::{
    Analyser, LevelMeter, ManualClock, OutputClock, PLAYBACK_SAMPLE_RATE, PlaybackScheduler,
    WIRE_SAMPLE_RATE, decode_inbound_pcm, encode_frame, f32_to_i16, i16_to_f32, resample_to_wire,
    samples_to_wav,
};

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, rate: u32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

// -- resampler properties -----------------------------------------------------

#[test]
fn resample_at_wire_rate_is_length_preserving() {
    let block = generate_sine_samples(440.0, WIRE_SAMPLE_RATE, 0.256, 0.8);
    assert_eq!(block.len(), 4096);

    let pcm = resample_to_wire(&block, WIRE_SAMPLE_RATE);
    assert_eq!(pcm.len(), block.len());

    for (orig, conv) in block.iter().zip(&pcm) {
        let back = i16_to_f32(*conv);
        assert!(
            (back - orig).abs() <= 1.0 / 32768.0,
            "sample {orig} came back as {back}"
        );
    }
}

#[test]
fn resample_ratio_from_common_device_rates() {
    for rate in [48000u32, 44100, 32000, 22050] {
        let block = generate_sine_samples(440.0, rate, 0.1, 0.5);
        let pcm = resample_to_wire(&block, rate);

        let ratio = f64::from(rate) / f64::from(WIRE_SAMPLE_RATE);
        let expected = (block.len() as f64 / ratio).round() as usize;
        assert_eq!(pcm.len(), expected, "rate {rate}");
    }
}

#[test]
fn downsampled_sine_stays_in_amplitude_bounds() {
    let block = generate_sine_samples(440.0, 48000, 0.1, 0.5);
    let pcm = resample_to_wire(&block, 48000);

    for &s in &pcm {
        let v = i16_to_f32(s);
        assert!(v.abs() <= 0.5 + 1.0 / 32768.0, "interpolation overshot: {v}");
    }
}

// -- wire round trip ----------------------------------------------------------

#[test]
fn outbound_frame_round_trips_through_inbound_decode() {
    let block = generate_sine_samples(440.0, WIRE_SAMPLE_RATE, 0.05, 0.7);
    let pcm = resample_to_wire(&block, WIRE_SAMPLE_RATE);
    let frame = encode_frame(&pcm);

    let decoded = decode_inbound_pcm(&frame.data).unwrap();
    assert_eq!(decoded.len(), pcm.len());
    for (sent, received) in pcm.iter().zip(&decoded) {
        assert_eq!(f32_to_i16(*received), *sent);
    }
}

// -- playback scheduling ------------------------------------------------------

#[test]
fn fresh_session_schedules_first_buffer_at_clock_now() {
    let clock = Arc::new(ManualClock::new());
    let mut scheduler = PlaybackScheduler::new(clock.clone());

    let part = generate_sine_samples(440.0, PLAYBACK_SAMPLE_RATE, 0.1, 0.5);
    let start = scheduler.schedule(part);
    assert!((start - clock.now()).abs() < 1e-9);
}

#[test]
fn irregular_arrivals_keep_monotonic_start_times() {
    let clock = Arc::new(ManualClock::new());
    let mut scheduler = PlaybackScheduler::new(clock.clone());

    let mut last_end = 0.0;
    let arrival_gaps = [0.0, 0.02, 0.3, 0.0, 0.0, 0.15, 0.5];
    for gap in arrival_gaps {
        clock.advance(gap);
        let part = generate_sine_samples(440.0, PLAYBACK_SAMPLE_RATE, 0.1, 0.5);
        let duration = part.len() as f64 / f64::from(PLAYBACK_SAMPLE_RATE);

        let start = scheduler.schedule(part);
        assert!(start + 1e-9 >= last_end, "start {start} before previous end {last_end}");
        assert!(start + 1e-9 >= clock.now(), "start {start} in the past");
        last_end = start + duration;
    }
}

#[test]
fn interruption_restarts_playback_from_now() {
    let clock = Arc::new(ManualClock::new());
    let mut scheduler = PlaybackScheduler::new(clock.clone());

    // Model has a long reply queued up
    for _ in 0..5 {
        scheduler.schedule(generate_sine_samples(440.0, PLAYBACK_SAMPLE_RATE, 0.5, 0.5));
    }
    assert!(scheduler.cursor() > 2.0);

    // Barge-in at 0.4s of playback
    clock.set(0.4);
    scheduler.interrupt();
    assert!((scheduler.cursor() - 0.4).abs() < 1e-9);

    let start = scheduler.schedule(generate_sine_samples(440.0, PLAYBACK_SAMPLE_RATE, 0.1, 0.5));
    assert!((start - 0.4).abs() < 1e-9);
}

#[test]
fn stop_discards_everything() {
    let clock = Arc::new(ManualClock::new());
    let mut scheduler = PlaybackScheduler::new(clock);

    scheduler.schedule(generate_sine_samples(440.0, PLAYBACK_SAMPLE_RATE, 1.0, 0.5));
    scheduler.stop();

    assert!(scheduler.is_drained());
    assert!((scheduler.cursor() - 0.0).abs() < f64::EPSILON);
}

// -- level metering -----------------------------------------------------------

#[test]
fn meter_reacts_to_inbound_audio() {
    let input = Arc::new(Analyser::new());
    let output = Arc::new(Analyser::new());
    let mut meter = LevelMeter::new(Arc::clone(&input), Arc::clone(&output));

    // Nothing flowing yet
    assert!(meter.poll().abs() < f32::EPSILON);

    // Model audio starts flowing through the output tap
    output.push(&generate_sine_samples(300.0, PLAYBACK_SAMPLE_RATE, 0.1, 0.9));
    let mut level = 0.0;
    for _ in 0..30 {
        level = meter.poll();
    }
    assert!(level > 0.0, "meter never rose above zero");
    assert!(level <= 1.0, "meter exceeded unit range: {level}");
}

// -- debug recording ----------------------------------------------------------

#[test]
fn captured_audio_dumps_to_valid_wav() {
    let samples = generate_sine_samples(440.0, WIRE_SAMPLE_RATE, 0.1, 0.5);
    let wav = samples_to_wav(&samples, WIRE_SAMPLE_RATE).unwrap();

    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, WIRE_SAMPLE_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(
        reader.samples::<i16>().filter_map(Result::ok).count(),
        samples.len()
    );
}
